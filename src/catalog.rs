use std::collections::HashMap;

/// Maps a service style name to its standard duration in minutes.
///
/// An explicit object handed to the engine at construction, so tests can
/// substitute fixtures without touching shared state. Lookup is total:
/// unknown styles fall back to the default.
#[derive(Debug, Clone)]
pub struct DurationCatalog {
    durations: HashMap<String, u32>,
    default_min: u32,
}

impl DurationCatalog {
    pub fn new(default_min: u32) -> Self {
        Self {
            durations: HashMap::new(),
            default_min,
        }
    }

    pub fn with_style(mut self, style: &str, minutes: u32) -> Self {
        self.durations.insert(style.to_string(), minutes);
        self
    }

    /// Exact string match; unmatched styles return the default.
    pub fn duration_minutes(&self, style: &str) -> u32 {
        self.durations.get(style).copied().unwrap_or(self.default_min)
    }

    pub fn default_minutes(&self) -> u32 {
        self.default_min
    }

    /// The standard braiding-studio table.
    pub fn standard() -> Self {
        Self::new(240)
            .with_style("Box Braids", 240)
            .with_style("Knotless Braids", 300)
            .with_style("Micro Braids", 480)
            .with_style("Cornrows", 180)
            .with_style("Senegalese Twists", 360)
            .with_style("Faux Locs", 420)
            .with_style("Crochet Braids", 180)
            .with_style("Goddess Braids", 240)
            .with_style("Fulani Braids", 300)
    }
}

impl Default for DurationCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
