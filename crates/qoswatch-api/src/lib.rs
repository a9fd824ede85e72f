// qoswatch-api: Async client for a traffic-optimization backend (telemetry stream + rule endpoints)

pub mod connection;
pub mod error;
pub mod gateway;
pub mod model;
pub mod transport;
pub mod websocket;

pub use connection::{ConnectionManager, ConnectionState, Handler, StreamEvent, Subscription};
pub use error::{GatewayError, ParseError, TransportError};
pub use gateway::RuleGateway;
pub use model::{
    Batch, LatencyMetrics, MetricsSnapshot, NewSdnRule, Packet, QosRule, RuleId, SdnAction,
    SdnRule, SdnStatus, SummaryStatistics,
};
pub use transport::TransportConfig;
pub use websocket::{Frame, FrameStream, ReconnectConfig, Transport, WsTransport};
