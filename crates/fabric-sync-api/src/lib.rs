// fabric-sync-api: interaction-model contracts consumed by the fabric-sync bridge layer

pub mod clusters;
pub mod error;
pub mod ids;
pub mod interaction;
pub mod sim;
pub mod value;

pub use error::Error;
pub use ids::{
    AttributeId, ClusterId, CommandId, EndpointId, EventId, FabricIndex, NodeId, PeerNodeId,
    ProductId, StatusCode, VendorId,
};
pub use interaction::{
    AttributePath, EventPath, InteractionClient, InvokeRequest, InvokeResponse, ReadRequest,
    ReportItem, ReportStream, Session, SubscribeRequest,
};
pub use sim::{Invocation, ReadBehavior, SimDevice, SimulatedFabric};
pub use value::AttributeValue;
