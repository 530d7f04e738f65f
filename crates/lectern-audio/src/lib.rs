//! Audio output path for buffered playback.
//!
//! The engine hands rendered PCM to a [`writer::BufferWriterThread`],
//! which drains it into an [`sink::OutputSink`] on a dedicated loop,
//! tracks elapsed played frames across device underruns, and notifies
//! the engine when the next scheduled marker frame has been crossed.

pub mod cpal_sink;
pub mod metrics;
pub mod ring_buffer;
pub mod sink;
pub mod testing;
pub mod writer;

pub use cpal_sink::CpalSink;
pub use metrics::WriterMetrics;
pub use ring_buffer::{PcmConsumer, PcmProducer, PcmRingBuffer};
pub use sink::{AudioError, OutputSink, TrackSpec};
pub use writer::{BufferWriterThread, SinkFactory, WriterCore, WriterHandle, WriterTick, NO_MARKER};
