//! 媒体转码
//!
//! 图片在进程内用 image 处理；音频、视频调用外部的 ffmpeg 与 silk 编码器。

use crate::element::MediaKind;
use crate::{debug, warn};
use anyhow::{Context as _, bail};
use image::ImageFormat;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;

/// 转码结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcoded {
    pub bytes: Vec<u8>,
    pub ext: String,
}

impl Transcoded {
    fn new(bytes: Vec<u8>, ext: &str) -> Self {
        Self {
            bytes,
            ext: ext.to_string(),
        }
    }
}

/// 图片格式嗅探
pub fn image_ext(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("gif")
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else {
        None
    }
}

pub fn is_bmp(bytes: &[u8]) -> bool {
    bytes.starts_with(b"BM")
}

/// AMR 或 SILK v3（可能带一个 0x02 前缀）
pub fn audio_ext(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"#!AMR") {
        Some("amr")
    } else if bytes.starts_with(b"#!SILK_V3") || bytes.starts_with(b"\x02#!SILK_V3") {
        Some("silk")
    } else {
        None
    }
}

/// ftyp 盒子的品牌为 isom / mp42
pub fn is_mp4(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && (&bytes[4..12] == b"ftypisom" || &bytes[4..12] == b"ftypmp42")
}

pub struct Transcoder {
    work_dir: PathBuf,
    bin_dir: PathBuf,
}

impl Transcoder {
    /// `work_dir` 存放中间文件；`bin_dir` 下按 `<os>-<arch>` 放置 silk 编码器
    pub fn new(work_dir: impl Into<PathBuf>, bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            bin_dir: bin_dir.into(),
        }
    }

    pub async fn transcode(
        &self,
        kind: MediaKind,
        bytes: Vec<u8>,
        hint_ext: Option<&str>,
    ) -> anyhow::Result<Transcoded> {
        match kind {
            MediaKind::Image => {
                tokio::task::spawn_blocking(move || transcode_image(bytes))
                    .await
                    .context("图片转码任务异常退出")?
            }
            MediaKind::Audio => self.transcode_audio(bytes).await,
            MediaKind::Video => self.transcode_video(bytes).await,
            MediaKind::File => Ok(Transcoded::new(bytes, hint_ext.unwrap_or("bin"))),
        }
    }

    async fn transcode_audio(&self, bytes: Vec<u8>) -> anyhow::Result<Transcoded> {
        if let Some(ext) = audio_ext(&bytes) {
            return Ok(Transcoded::new(bytes, ext));
        }

        let encoder = self
            .silk_encoder()
            .context("未找到 silk 编码器，无法转换语音")?;
        let scratch = Scratch::new(&self.work_dir).await?;
        let input = scratch.path("in");
        let pcm = scratch.path("pcm");
        let output = scratch.path("silk");
        fs::write(&input, &bytes).await?;

        run(Command::new("ffmpeg")
            .arg("-y")
            .arg("-i")
            .arg(&input)
            .args(["-f", "s16le", "-ar", "24000", "-ac", "1"])
            .arg(&pcm))
        .await?;
        run(Command::new(&encoder)
            .arg(&pcm)
            .arg(&output)
            .args(["-Fs_API", "24000", "-tencent"]))
        .await?;

        let out = fs::read(&output).await.context("读取 silk 输出失败")?;
        Ok(Transcoded::new(out, "silk"))
    }

    async fn transcode_video(&self, bytes: Vec<u8>) -> anyhow::Result<Transcoded> {
        if is_mp4(&bytes) {
            return Ok(Transcoded::new(bytes, "mp4"));
        }

        let scratch = Scratch::new(&self.work_dir).await?;
        let input = scratch.path("in");
        let output = scratch.path("mp4");
        fs::write(&input, &bytes).await?;

        run(Command::new("ffmpeg")
            .arg("-y")
            .arg("-i")
            .arg(&input)
            .args(["-vcodec", "libx264", "-acodec", "aac"])
            .arg(&output))
        .await?;

        let out = fs::read(&output).await.context("读取 mp4 输出失败")?;
        Ok(Transcoded::new(out, "mp4"))
    }

    /// 优先使用 data/bin 下的内置编码器，其次 PATH
    fn silk_encoder(&self) -> Option<PathBuf> {
        let exe = if cfg!(windows) {
            "silk_encoder.exe"
        } else {
            "silk_encoder"
        };
        let bundled = self
            .bin_dir
            .join(format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH))
            .join(exe);
        if bundled.is_file() {
            return Some(bundled);
        }
        std::env::var_os("PATH").and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(exe))
                .find(|p| p.is_file())
        })
    }
}

fn transcode_image(bytes: Vec<u8>) -> anyhow::Result<Transcoded> {
    if let Some(ext) = image_ext(&bytes) {
        return Ok(Transcoded::new(bytes, ext));
    }

    let img = image::load_from_memory(&bytes).context("无法识别的图片格式")?;
    let mut out = Vec::new();
    if is_bmp(&bytes) {
        // JPEG 不支持透明通道
        image::DynamicImage::ImageRgb8(img.to_rgb8())
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)?;
        Ok(Transcoded::new(out, "jpg"))
    } else {
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
        Ok(Transcoded::new(out, "png"))
    }
}

async fn run(command: &mut Command) -> anyhow::Result<()> {
    let program = format!("{:?}", command.as_std().get_program());
    debug!(target: "Transcode", "执行 {}", program);
    let output = command
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("无法启动 {}", program))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr
            .lines()
            .rev()
            .take(3)
            .collect::<Vec<_>>()
            .join(" | ");
        bail!("{} 退出码 {:?}: {}", program, output.status.code(), tail);
    }
    Ok(())
}

/// 单次转码的临时文件组，离开作用域时删除
struct Scratch {
    prefix: PathBuf,
}

impl Scratch {
    async fn new(dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("创建目录失败: {}", dir.display()))?;
        let tag: u64 = rand::random();
        Ok(Self {
            prefix: dir.join(format!("tmp-{:016x}", tag)),
        })
    }

    fn path(&self, ext: &str) -> PathBuf {
        self.prefix.with_extension(ext)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        for ext in ["in", "pcm", "silk", "mp4"] {
            let path = self.path(ext);
            if path.exists()
                && let Err(e) = std::fs::remove_file(&path)
            {
                warn!(target: "Transcode", "清理临时文件 {} 失败: {}", path.display(), e);
            }
        }
    }
}

/// 检查 ffmpeg 是否可用
pub async fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await
        .is_ok_and(|o| o.status.success())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bmp_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([255, 0, 0]));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Bmp)
            .unwrap();
        out
    }

    #[test]
    fn magic_bytes() {
        assert_eq!(image_ext(b"GIF89a...."), Some("gif"));
        assert_eq!(image_ext(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("jpg"));
        assert_eq!(image_ext(b"BM...."), None);
        assert_eq!(audio_ext(b"\x02#!SILK_V3abc"), Some("silk"));
        assert_eq!(audio_ext(b"#!AMR\n"), Some("amr"));
        assert_eq!(audio_ext(b"RIFF"), None);
        assert!(is_mp4(b"\0\0\0\x20ftypisom\0\0"));
        assert!(!is_mp4(b"\0\0\0\x20ftypqt  \0\0"));
    }

    #[tokio::test]
    async fn bmp_becomes_jpeg_and_png_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Transcoder::new(dir.path(), dir.path().join("bin"));

        let out = transcoder
            .transcode(MediaKind::Image, bmp_bytes(), None)
            .await
            .unwrap();
        assert_eq!(out.ext, "jpg");
        assert_eq!(image_ext(&out.bytes), Some("jpg"));

        let png = b"\x89PNG\r\n\x1a\nrest".to_vec();
        let out = transcoder
            .transcode(MediaKind::Image, png.clone(), None)
            .await
            .unwrap();
        assert_eq!(out, Transcoded::new(png, "png"));
    }

    #[tokio::test]
    async fn garbage_image_fails() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Transcoder::new(dir.path(), dir.path());
        assert!(
            transcoder
                .transcode(MediaKind::Image, b"not an image".to_vec(), None)
                .await
                .is_err()
        );
    }
}
