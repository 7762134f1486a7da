mod events_manager;

pub use events_manager::*;

mod custom_events;

pub use custom_events::pipeline::{
    approx_datetime_from_instant, disable_pipeline_tracing, emit_pipeline_trace,
    enable_pipeline_tracing, pipeline_tracing_enabled, FrameSnapshot, PipelineStage,
    PipelineTraceAggregator, PipelineTraceEvent, StageStatus, PIPELINE_TRACE_EVENT,
};
