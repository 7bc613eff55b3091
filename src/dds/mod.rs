//! The application-facing side: participants, publishers and subscribers,
//! typed DataWriters and DataReaders, QoS and status events.

pub mod adapters;
pub mod datareader;
pub mod datawriter;
pub(crate) mod helpers;
pub mod participant;
pub mod participant_registry;
pub mod pubsub;
/// DDS Quality of Service
pub mod qos;
/// DDS Error
pub mod result;
pub mod statusevents;
pub mod topic;

pub use datareader::{DataReader, DataSample, SampleInfo};
pub use datawriter::DataWriter;
pub use participant::{DiscoveryConfig, DomainParticipant, ParticipantConfig};
pub use pubsub::{Publisher, Subscriber};
pub use topic::{Topic, TopicKind};
