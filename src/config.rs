//! Engine configuration — the "engine config collaborator" of §6.
//!
//! The render graph core itself never reads a config file; it is handed an
//! [`EngineConfig`] value by the application. Deserialization is provided for
//! convenience, matching the teacher's own `serde` + `serde_json` pairing.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Number of frames that may be in flight simultaneously.
///
/// §3 fixes this at 3 for the reference behavior; it is kept configurable at
/// construction time (rather than a `const`) so tests can exercise N=1 and
/// N=2 without duplicating the frame-slot machinery.
pub const DEFAULT_FRAMES_IN_FLIGHT: u32 = 3;

/// Static, host-side configuration the core is handed at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory the shader cache watches for `.vert`/`.frag`/`.comp`/`.rgen`/`.rchit`/`.rmiss` sources.
    pub shader_source_dir: PathBuf,

    /// Directory holding compiled SPIR-V (`.spv`) modules.
    pub shader_spirv_dir: PathBuf,

    /// Root directory for texture and mesh assets.
    pub asset_root: PathBuf,

    /// Number of frames in flight (§3 invariant: reference value is 3).
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: u32,

    /// Capacity of the bindless 2D texture array (§4.3).
    #[serde(default = "default_bindless_capacity")]
    pub bindless_texture_capacity: u32,

    /// Whether to attach `VK_EXT_debug_utils` and apply `set_debug_name` labels.
    #[serde(default)]
    pub enable_validation: bool,

    /// External shader compile script, invoked by [`crate::shader_cache::ShaderCache`]
    /// when a source file's timestamp has advanced (§4.4).
    pub shader_compile_script: PathBuf,
}

fn default_frames_in_flight() -> u32 {
    DEFAULT_FRAMES_IN_FLIGHT
}

fn default_bindless_capacity() -> u32 {
    1024
}

impl EngineConfig {
    /// Loads configuration from a JSON file on disk.
    pub fn load(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
