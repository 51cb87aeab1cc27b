//! WASAPI endpoints.

mod capture;
mod device;

pub use capture::WasapiEndpoint;
pub use device::{enumerate_audio_devices, find_device_by_id};
