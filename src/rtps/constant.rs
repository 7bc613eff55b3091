use std::time::Duration as StdDuration;

use mio::Token;

use crate::{
  discovery::builtin_endpoint::BuiltinEndpointSet,
  structure::{duration::Duration, guid::EntityId},
};

// Fixed poll tokens of the participant event loop. Entity tokens made by
// `EntityId::as_token` are above these.
pub const STOP_POLL_TOKEN: Token = Token(0);

pub const DISCOVERY_LISTENER_TOKEN: Token = Token(1);
pub const DISCOVERY_MUL_LISTENER_TOKEN: Token = Token(2);
pub const USER_TRAFFIC_LISTENER_TOKEN: Token = Token(3);
pub const USER_TRAFFIC_MUL_LISTENER_TOKEN: Token = Token(4);

pub const ADD_READER_TOKEN: Token = Token(10);
pub const REMOVE_READER_TOKEN: Token = Token(11);
pub const ADD_WRITER_TOKEN: Token = Token(12);
pub const REMOVE_WRITER_TOKEN: Token = Token(13);

pub const ACKNACK_MESSAGE_TO_LOCAL_WRITER_TOKEN: Token = Token(20);
pub const DISCOVERY_UPDATE_NOTIFICATION_TOKEN: Token = Token(21);

// Tokens of the discovery thread
pub const DISCOVERY_COMMAND_TOKEN: Token = Token(30);
pub const SPDP_LIVENESS_TOKEN: Token = Token(31);
pub const PARTICIPANT_CLEANUP_TOKEN: Token = Token(32);
pub const DISCOVERY_PARTICIPANT_DATA_TOKEN: Token = Token(33);
pub const DISCOVERY_READER_DATA_TOKEN: Token = Token(34);
pub const DISCOVERY_WRITER_DATA_TOKEN: Token = Token(35);
pub const SPDP_ANNOUNCE_TOKEN: Token = Token(36);

// RTPS spec Section 8.4.7.1.1 "Default Timing-Related Values"
pub const HEARTBEAT_PERIOD: StdDuration = StdDuration::from_secs(1);
pub const NACK_RESPONSE_DELAY: StdDuration = StdDuration::from_millis(200);
pub const HEARTBEAT_RESPONSE_DELAY: StdDuration = StdDuration::from_millis(200);

// Reader keeps asking for data from a matched writer it has not heard from.
pub const PREEMPTIVE_ACKNACK_PERIOD: StdDuration = StdDuration::from_secs(5);

pub const CACHE_CLEANING_PERIOD: StdDuration = StdDuration::from_secs(6);

// Participant discovery
pub const SPDP_ANNOUNCEMENT_PERIOD: StdDuration = StdDuration::from_secs(3);
pub const PARTICIPANT_LEASE_DURATION: Duration = Duration::from_secs(20);
pub const PARTICIPANT_CLEANUP_PERIOD: StdDuration = StdDuration::from_secs(2);

// Event loop wakes up at least this often to check for stop
pub const POLL_TIMEOUT: StdDuration = StdDuration::from_millis(2000);

/// Remote builtin readers to match, given the builtin endpoint set the remote
/// participant announces: (local writer, remote reader, required bit).
pub const BUILTIN_READERS_INIT_LIST: &[(EntityId, EntityId, u32)] = &[
  (
    EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER, // SPDP
    EntityId::SPDP_BUILTIN_PARTICIPANT_READER,
    BuiltinEndpointSet::PARTICIPANT_DETECTOR,
  ),
  (
    EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER, // SEDP ...
    EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
    BuiltinEndpointSet::PUBLICATIONS_DETECTOR,
  ),
  (
    EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_WRITER,
    EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_READER,
    BuiltinEndpointSet::SUBSCRIPTIONS_DETECTOR,
  ),
];

/// Remote builtin writers to match: (remote writer, local reader, required
/// bit).
pub const BUILTIN_WRITERS_INIT_LIST: &[(EntityId, EntityId, u32)] = &[
  (
    EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER, // SPDP
    EntityId::SPDP_BUILTIN_PARTICIPANT_READER,
    BuiltinEndpointSet::PARTICIPANT_ANNOUNCER,
  ),
  (
    EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER, // SEDP ...
    EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
    BuiltinEndpointSet::PUBLICATIONS_ANNOUNCER,
  ),
  (
    EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_WRITER,
    EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_READER,
    BuiltinEndpointSet::SUBSCRIPTIONS_ANNOUNCER,
  ),
];
