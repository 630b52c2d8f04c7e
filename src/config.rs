use bon::Builder;

pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;
pub const DEFAULT_PREFIX_SIZE: usize = 1024;
pub const DEFAULT_HEADER_MARGIN: u64 = 5 * 1024;

/// Settings for one parse or rebuild, passed explicitly into each top level operation.
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Record operational faults as diagnostics and continue instead of returning them
    #[builder(default = true)]
    pub ignore_errors: bool,
    /// Size of each sequential scan read and of each payload copy read
    #[builder(default = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
    /// Number of payload bytes buffered per atom, starting right after the type code
    #[builder(default = DEFAULT_PREFIX_SIZE)]
    pub prefix_size: usize,
    /// Slack around the header spot inside which header atoms are trusted
    #[builder(default = DEFAULT_HEADER_MARGIN)]
    pub header_margin: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.ignore_errors);
        assert_eq!(config.chunk_size, 262_144);
        assert_eq!(config.prefix_size, 1024);
        assert_eq!(config.header_margin, 5120);

        let strict = Config::builder().ignore_errors(false).chunk_size(64).build();
        assert!(!strict.ignore_errors);
        assert_eq!(strict.chunk_size, 64);
    }
}
