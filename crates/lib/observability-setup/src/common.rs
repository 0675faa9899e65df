#[derive(Clone, Debug)]
pub struct ObservabilityOptions {
    /// Emit one JSON object per event instead of human-readable lines.
    pub json: bool,
    pub ansi: bool,
    /// Filter used when `RUST_LOG` is unset.
    pub default_directive: String,
}

impl Default for ObservabilityOptions {
    fn default() -> Self {
        Self {
            json: false,
            ansi: true,
            default_directive: "nodeflow=info".to_string(),
        }
    }
}
