pub mod events;
pub mod orchestrator;
pub mod provider_health;

pub use events::{Notifier, ResolutionEvent};
pub use orchestrator::{ResolutionOrchestrator, ResolutionPhase, ResolverStats};
pub use provider_health::{ProviderHealthBoard, ProviderHealthMonitor, ProviderStatus};
