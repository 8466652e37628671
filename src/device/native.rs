//! nokhwa-backed capture device for desktop processes

use super::{CaptureDevice, CaptureError, DeviceError};
use crate::types::{CapturedImage, Constraints};
use async_trait::async_trait;
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType},
    CallbackCamera,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Live native stream. Clones share the same camera.
#[derive(Clone)]
pub struct NativeStream {
    id: Uuid,
    camera: Arc<Mutex<CallbackCamera>>,
    stopped: Arc<AtomicBool>,
}

impl NativeStream {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for NativeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeStream")
            .field("id", &self.id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Camera access through nokhwa's native backends
#[derive(Debug, Clone)]
pub struct NativeDevice {
    jpeg_quality: u8,
}

impl NativeDevice {
    pub fn new(jpeg_quality: u8) -> Self {
        Self { jpeg_quality }
    }
}

impl Default for NativeDevice {
    fn default() -> Self {
        Self::new(90)
    }
}

#[async_trait]
impl CaptureDevice for NativeDevice {
    type Stream = NativeStream;

    async fn acquire(&self, constraints: &Constraints) -> Result<NativeStream, DeviceError> {
        let constraints = constraints.clone();
        log::debug!(
            "Opening native camera {} at {}x{}@{}",
            constraints.device_index,
            constraints.resolution.width,
            constraints.resolution.height,
            constraints.fps
        );

        tokio::task::spawn_blocking(move || open_camera(&constraints))
            .await
            .map_err(|e| DeviceError::other(format!("camera open task failed: {}", e)))?
    }

    fn stop(&self, stream: &NativeStream) {
        if stream.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        match stream.camera.lock() {
            Ok(mut camera) => {
                if let Err(e) = camera.stop_stream() {
                    log::warn!("Failed to stop native stream {}: {}", stream.id, e);
                }
            }
            Err(_) => log::error!("Native camera lock poisoned while stopping {}", stream.id),
        }
    }

    async fn capture_frame(&self, stream: &NativeStream) -> Result<CapturedImage, CaptureError> {
        if stream.is_stopped() {
            return Err(CaptureError::StreamStopped);
        }

        let stream = stream.clone();
        let quality = self.jpeg_quality;
        tokio::task::spawn_blocking(move || grab_jpeg(&stream, quality))
            .await
            .map_err(|e| CaptureError::Backend(format!("capture task failed: {}", e)))?
    }
}

fn open_camera(constraints: &Constraints) -> Result<NativeStream, DeviceError> {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
        nokhwa::utils::CameraFormat::new(
            nokhwa::utils::Resolution::new(
                constraints.resolution.width,
                constraints.resolution.height,
            ),
            FrameFormat::MJPEG,
            constraints.fps,
        ),
    ));

    let mut camera = CallbackCamera::new(CameraIndex::Index(constraints.device_index), requested, |_| {})
        .map_err(|e| device_error_from_message(e.to_string()))?;

    camera
        .open_stream()
        .map_err(|e| device_error_from_message(e.to_string()))?;

    Ok(NativeStream {
        id: Uuid::new_v4(),
        camera: Arc::new(Mutex::new(camera)),
        stopped: Arc::new(AtomicBool::new(false)),
    })
}

fn grab_jpeg(stream: &NativeStream, quality: u8) -> Result<CapturedImage, CaptureError> {
    let buffer = {
        let mut camera = stream
            .camera
            .lock()
            .map_err(|_| CaptureError::Backend("camera lock poisoned".to_string()))?;
        camera
            .poll_frame()
            .map_err(|e| CaptureError::Backend(e.to_string()))?
    };

    let resolution = buffer.resolution();
    let rgb = buffer
        .decode_image::<RgbFormat>()
        .map_err(|e| CaptureError::Encoding(e.to_string()))?;

    let img = image::RgbImage::from_raw(resolution.width_x, resolution.height_y, rgb.into_raw())
        .ok_or_else(|| CaptureError::Encoding("decoded frame has wrong size".to_string()))?;

    let mut jpeg = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, quality);
    image::DynamicImage::ImageRgb8(img)
        .write_with_encoder(encoder)
        .map_err(|e| CaptureError::Encoding(e.to_string()))?;

    Ok(CapturedImage::jpeg(
        jpeg,
        resolution.width_x,
        resolution.height_y,
    ))
}

/// Backends report failures as free text; map them onto the coarse kinds.
pub(crate) fn device_error_from_message(message: String) -> DeviceError {
    let lower = message.to_lowercase();
    if ["permission", "denied", "not authorized", "notallowed", "eacces"]
        .iter()
        .any(|sig| lower.contains(sig))
    {
        DeviceError::permission_refused(message)
    } else if ["not found", "no such", "no device", "enoent", "out of range", "notfound"]
        .iter()
        .any(|sig| lower.contains(sig))
    {
        DeviceError::not_found(message)
    } else if ["busy", "in use", "ebusy", "notreadable", "could not start"]
        .iter()
        .any(|sig| lower.contains(sig))
    {
        DeviceError::unavailable(message)
    } else {
        DeviceError::other(message)
    }
}
