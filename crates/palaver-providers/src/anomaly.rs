//! Detection of completion responses served by an unintended upstream model.
//!
//! The upstream gives no structured signal when it misroutes a request; the
//! only evidence is text the wrong model tends to emit. Detection is therefore
//! pluggable and the default is a plain substring heuristic driven by config.

/// Decides whether a completion response must be discarded.
pub trait AnomalyDetector: Send + Sync {
    /// Return a short reason when `text` is anomalous, `None` when it is clean.
    fn detect(&self, text: &str) -> Option<String>;
}

/// Flags responses containing any of a set of marker substrings (case-insensitive).
#[derive(Debug, Clone)]
pub struct MarkerDetector {
    markers: Vec<String>,
    lowered: Vec<String>,
}

impl MarkerDetector {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let markers: Vec<String> = markers
            .into_iter()
            .map(Into::into)
            .filter(|m| !m.is_empty())
            .collect();
        let lowered = markers.iter().map(|m| m.to_lowercase()).collect();
        Self { markers, lowered }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

impl AnomalyDetector for MarkerDetector {
    fn detect(&self, text: &str) -> Option<String> {
        let haystack = text.to_lowercase();
        self.lowered
            .iter()
            .position(|m| haystack.contains(m.as_str()))
            .map(|i| format!("contains contamination marker {:?}", self.markers[i]))
    }
}
