pub mod directory;
pub mod error;
pub mod events;
pub mod identity;
pub mod recency;
pub mod scroll;
pub mod session;
pub mod settings;
pub mod timeline;

pub use directory::{DirectoryIndex, SearchOutcome};
pub use error::{EngineError, EngineResult};
pub use events::SessionEvent;
pub use identity::{FixedIdentity, IdentityProvider};
pub use recency::RecencyTracker;
pub use scroll::ScrollTracker;
pub use session::{ChatSession, SearchPhase, SessionSnapshot};
pub use settings::SessionSettings;
pub use timeline::TimelineService;
