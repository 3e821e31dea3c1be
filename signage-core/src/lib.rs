pub mod chunk_cache;
pub mod download_queue;
pub mod error;
pub mod orchestrator;
pub mod renderer;
pub mod schedule;

pub mod prelude {
    pub use crate::chunk_cache::{ChunkCache, RangeResponse, ResourceFetcher};
    pub use crate::download_queue::{DownloadQueue, DownloadStatus, DownloadTask, QueueProgress};
    pub use crate::error::{
        CacheError, CacheResult, OrchestratorError, OrchestratorResult, QueueError, QueueResult,
        RenderError, RenderResult,
    };
    pub use crate::orchestrator::{
        CacheReadiness, CacheWidgetHtmlProvider, CollectionOrchestrator, StatusSnapshot,
    };
    pub use crate::renderer::{
        DomSink, LayoutRenderer, MediaReadiness, RendererEvent, WidgetHtmlProvider,
    };
    pub use crate::schedule::{
        Conflict, InterruptSlot, ResolvedSchedule, ResolverContext, plan_interrupt_slots,
    };
}
