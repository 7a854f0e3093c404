pub struct Icons;

impl Icons {
    pub const ROCKET: &str = "🚀";
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const STATS: &str = "📊";
    pub const LINK: &str = "🔗";
    pub const DATABASE: &str = "🗄️";
    pub const CLOCK: &str = "⏱️";
    pub const BOOK: &str = "📚";
    pub const MONEY: &str = "💰";
    pub const TAG: &str = "🏷️";
    pub const ONLINE: &str = "🟢";
    pub const OFFLINE: &str = "🔴";
}
