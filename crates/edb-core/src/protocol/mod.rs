//! Wire protocol: descriptor table, receive buffer, framing and classification.

pub mod accumulator;
pub mod codec;
pub mod descriptor;
pub mod events;

pub use accumulator::ByteAccumulator;
pub use codec::{encode_message, EncodeError, FramingError, PacketDecoder, RawMessage};
pub use descriptor::{
    BreakpointType, ChargeMethod, Channel, Descriptor, Direction, InterruptKind, InterruptSource,
    Param, ParamScope, PayloadLength,
};
pub use events::{
    parse_interrupt_context, ClassifyError, Classifier, CommandReply, DataSample, Event,
    InterruptContext, StdIoData, TimeSample, WatchpointEvent,
};
