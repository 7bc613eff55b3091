//! The reliability and discovery core of a DDS implementation, speaking the
//! [RTPS 2.3](https://www.omg.org/spec/DDSI-RTPS/2.3) wire protocol.
//!
//! A [`DomainParticipant`] runs two threads: one owns the sockets and the
//! protocol state of every Writer and Reader, the other runs participant and
//! endpoint discovery (SPDP and SEDP). Applications create [`Publisher`]s and
//! [`Subscriber`]s, and from those typed [`DataWriter`]s and [`DataReader`]s.
//! Writers and readers on the same topic find each other through discovery
//! and are matched when their QoS policies are compatible.
//!
//! Samples are encoded by a [`dds::adapters::SerializerAdapter`] chosen by the
//! application; this crate does not contain a CDR codec for user types.
//!
//! # Usage Example
//!
//! ```no_run
//! use rtpscore::{
//!   dds::adapters::{Keyed, SerializerAdapter},
//!   messages::serialized_payload::RepresentationIdentifier,
//!   DomainParticipant, QosPolicyBuilder, TopicKind,
//! };
//! use bytes::Bytes;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Temperature(u32);
//!
//! impl Keyed for Temperature {
//!   type K = ();
//!   fn key(&self) {}
//! }
//!
//! struct Raw;
//!
//! impl SerializerAdapter<Temperature> for Raw {
//!   type Error = std::io::Error;
//!   fn output_encoding() -> RepresentationIdentifier {
//!     RepresentationIdentifier::CDR_LE
//!   }
//!   fn to_bytes(value: &Temperature) -> Result<Bytes, std::io::Error> {
//!     Ok(Bytes::copy_from_slice(&value.0.to_le_bytes()))
//!   }
//! }
//!
//! let participant = DomainParticipant::new(0).unwrap();
//! let qos = QosPolicyBuilder::new().build();
//! let topic = participant
//!   .create_topic("Temperature", "Temperature", &qos, TopicKind::NoKey)
//!   .unwrap();
//! let publisher = participant.create_publisher(&qos).unwrap();
//! let writer = publisher
//!   .create_datawriter::<Temperature, Raw>(&topic, None, None)
//!   .unwrap();
//! writer.write(Temperature(21), None).unwrap();
//! ```

#[macro_use]
mod checked_impl;

pub mod dds;
pub mod discovery;
pub mod messages;
pub mod network;
pub mod rtps;
pub mod structure;

#[cfg(test)]
mod test;

pub use dds::{
  participant_registry::{lookup_participant, stop_all},
  qos::{policy, QosPolicies, QosPolicyBuilder},
  result::{Error, Result},
  statusevents::{
    DataReaderListener, DataReaderStatus, DataWriterListener, DataWriterStatus, MatchingInfo,
    MatchingStatus,
  },
  DataReader, DataSample, DataWriter, DiscoveryConfig, DomainParticipant, ParticipantConfig,
  Publisher, SampleInfo, Subscriber, Topic, TopicKind,
};
pub use structure::{
  duration::Duration,
  guid::{EntityId, GuidPrefix, GUID},
  locator::Locator,
  sequence_number::SequenceNumber,
  time::Timestamp,
};
