//! Video decoder using FFmpeg
//!
//! Decodes video files to tightly packed RGBA frames using the ffmpeg-next
//! crate.

use std::path::Path;

use crate::frame::PixelFrame;

/// Errors that can occur during video decoding
#[derive(Debug, thiserror::Error)]
pub enum VideoDecoderError {
    #[error("Failed to open video file: {0}")]
    OpenFailed(String),
    #[error("No video stream found in file")]
    NoVideoStream,
    #[error("Failed to create decoder: {0}")]
    DecoderCreationFailed(String),
    #[error("Failed to create scaler: {0}")]
    ScalerCreationFailed(String),
    #[error("Decoding failed: {0}")]
    DecodeFailed(String),
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),
}

/// Video decoder that reads frames from a video file
pub struct VideoDecoder {
    input: ffmpeg_next::format::context::Input,
    video_stream_index: usize,
    decoder: ffmpeg_next::decoder::Video,
    /// Converts decoded frames to RGBA
    scaler: ffmpeg_next::software::scaling::Context,
    width: u32,
    height: u32,
    frame_rate: f64,
    /// Duration in seconds
    duration: f64,
    /// Time base for PTS conversion
    time_base: f64,
}

impl VideoDecoder {
    /// Open a video file for decoding
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VideoDecoderError> {
        // Safe to call multiple times
        ffmpeg_next::init()?;

        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();

        let input = ffmpeg_next::format::input(&path)
            .map_err(|_| VideoDecoderError::OpenFailed(path_str.clone()))?;

        let video_stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or(VideoDecoderError::NoVideoStream)?;

        let video_stream_index = video_stream.index();

        let time_base = video_stream.time_base();
        let time_base_f64 = time_base.numerator() as f64 / time_base.denominator() as f64;

        let frame_rate = video_stream.avg_frame_rate();
        let frame_rate_f64 = if frame_rate.denominator() > 0 && frame_rate.numerator() > 0 {
            frame_rate.numerator() as f64 / frame_rate.denominator() as f64
        } else {
            30.0
        };

        let duration = if video_stream.duration() > 0 {
            video_stream.duration() as f64 * time_base_f64
        } else if input.duration() > 0 {
            input.duration() as f64 / ffmpeg_next::ffi::AV_TIME_BASE as f64
        } else {
            0.0
        };

        let context = ffmpeg_next::codec::context::Context::from_parameters(video_stream.parameters())?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| VideoDecoderError::DecoderCreationFailed(e.to_string()))?;

        let width = decoder.width();
        let height = decoder.height();

        tracing::info!(
            "Opened video {}: {}x{} @ {:.2}fps, duration: {:.2}s",
            path_str,
            width,
            height,
            frame_rate_f64,
            duration
        );

        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGBA,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| VideoDecoderError::ScalerCreationFailed(e.to_string()))?;

        Ok(Self {
            input,
            video_stream_index,
            decoder,
            scaler,
            width,
            height,
            frame_rate: frame_rate_f64,
            duration,
            time_base: time_base_f64,
        })
    }

    /// Decode the next frame, `Ok(None)` at end of file
    pub fn decode_next_frame(&mut self) -> Result<Option<PixelFrame>, VideoDecoderError> {
        let mut decoded_frame = ffmpeg_next::frame::Video::empty();

        loop {
            match self.decoder.receive_frame(&mut decoded_frame) {
                Ok(()) => {
                    let pts = decoded_frame.pts().unwrap_or(0) as f64 * self.time_base;

                    // Recreate scaler if format changed mid-stream
                    if decoded_frame.format() != self.scaler.input().format {
                        self.scaler = ffmpeg_next::software::scaling::Context::get(
                            decoded_frame.format(),
                            self.width,
                            self.height,
                            ffmpeg_next::format::Pixel::RGBA,
                            self.width,
                            self.height,
                            ffmpeg_next::software::scaling::Flags::BILINEAR,
                        )
                        .map_err(|e| VideoDecoderError::ScalerCreationFailed(e.to_string()))?;
                    }

                    let mut rgba_frame = ffmpeg_next::frame::Video::empty();
                    self.scaler.run(&decoded_frame, &mut rgba_frame)?;

                    let data = rgba_frame.data(0);
                    let stride = rgba_frame.stride(0);
                    let row_bytes = (self.width as usize) * 4;
                    let expected = PixelFrame::expected_size(self.width, self.height);

                    let rgba_data = if stride == row_bytes {
                        data[..expected].to_vec()
                    } else {
                        let mut output = Vec::with_capacity(expected);
                        for y in 0..self.height as usize {
                            let row_start = y * stride;
                            output.extend_from_slice(&data[row_start..row_start + row_bytes]);
                        }
                        output
                    };

                    let pts_frame_index = (pts * self.frame_rate).round().max(0.0) as u64;

                    return Ok(Some(PixelFrame::new(rgba_data, self.width, self.height, pts_frame_index)));
                }
                Err(ffmpeg_next::Error::Other {
                    errno: ffmpeg_next::error::EAGAIN,
                }) => {
                    // Need more input
                }
                Err(ffmpeg_next::Error::Eof) => {
                    return Ok(None);
                }
                Err(e) => {
                    return Err(VideoDecoderError::DecodeFailed(e.to_string()));
                }
            }

            loop {
                match self.input.packets().next() {
                    Some((stream, packet)) => {
                        if stream.index() == self.video_stream_index {
                            self.decoder.send_packet(&packet)?;
                            break;
                        }
                    }
                    None => {
                        self.decoder.send_eof()?;
                        break;
                    }
                }
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    /// Frame count from the reported duration, 0 when FFmpeg knows no duration
    pub fn estimated_frame_count(&self) -> u64 {
        (self.duration * self.frame_rate) as u64
    }
}
