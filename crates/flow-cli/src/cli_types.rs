use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliOutputFormat {
    /// Human-readable incremental transcript.
    #[default]
    Text,
    /// One JSON document per snapshot and per result.
    Json,
}

impl CliOutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}
