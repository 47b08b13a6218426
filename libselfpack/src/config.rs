use crate::compress::Algorithm;

/// Appended to the target path to name the packed output.
pub const PACKED_SUFFIX: &str = ".packed";

/// Settings shared by the packer and the unpacker for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub algorithm: Algorithm,
    pub packed_suffix: String,
}
impl Config {
    pub fn with_algorithm(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            ..Self::default()
        }
    }
}
impl Default for Config {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::active(),
            packed_suffix: PACKED_SUFFIX.to_string(),
        }
    }
}
