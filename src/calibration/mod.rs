// Calibration module - ambient noise profile and its persistence
//
// Two components:
// 1. CalibrationProfile: noise floor and sensitivity measured for a room/mic
// 2. ProfileStore: key/value persistence (in-memory or JSON file)
//
// The detection engine loads a stored profile on initialize, or measures a
// fresh one from silent frames, and writes the result back.

pub mod profile;
pub mod store;

pub use profile::CalibrationProfile;
pub use store::{JsonFileProfileStore, MemoryProfileStore, ProfileStore};
