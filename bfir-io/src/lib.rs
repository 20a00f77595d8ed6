//! Collaborators for BFIR - sound files, coefficient loaders and offline filter clients

mod equalizer;
mod error;
mod loaders;
mod preconvolve;
mod resample;
mod settings;
pub mod sound;
mod stream;

pub use equalizer::{Band, Equalizer, ISO_BANDS};
pub use error::IoError;
pub use loaders::{
    decode_raw_coeffs, dirac_coeffs, load_raw_coeffs, load_sound_coeffs, load_text_coeffs,
    parse_text_coeffs, BufferCoefficients, SoundFileCoefficients,
};
pub use preconvolve::{
    attenuation_for, build_chain, calculate_attenuation, convolve_impulses, db_to_scale, djb_hash,
    float_format, Attenuation, ImpulseInfo,
};
pub use resample::resample;
pub use settings::Settings;
pub use sound::{SoundBuffer, SoundInfo};
pub use stream::BlockStream;
