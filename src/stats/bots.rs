//! Crawler detection by user-agent substring

/// Case-insensitive substring match against known crawler agents
#[derive(Debug, Clone, Default)]
pub struct BotFilter {
    needles: Vec<String>,
}

impl BotFilter {
    pub fn new<S: AsRef<str>>(agents: &[S]) -> Self {
        let needles = agents
            .iter()
            .map(|a| a.as_ref().trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect();
        Self { needles }
    }

    /// Missing agents are treated as human
    pub fn is_bot(&self, user_agent: Option<&str>) -> bool {
        let Some(agent) = user_agent else {
            return false;
        };
        let agent = agent.to_lowercase();
        self.needles.iter().any(|needle| agent.contains(needle.as_str()))
    }
}
