use std::{io, marker::PhantomData, sync::Arc, time::Duration};

use mio::{Evented, Poll, PollOpt, Ready, Token};
use mio_extras::channel::{self as mio_channel, SendError};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dds::{
    adapters::DeserializerAdapter,
    pubsub::Subscriber,
    qos::QosPolicies,
    result::{Error, Result},
    statusevents::{DataReaderStatus, StatusEvented, StatusReceiver},
    topic::Topic,
  },
  discovery::discovery::DiscoveryCommand,
  structure::{
    cache_change::{CacheChange, ChangeKind},
    guid::GUID,
    history_cache::HistoryCache,
    instance_handle::InstanceHandle,
    sequence_number::SequenceNumber,
    time::Timestamp,
  },
};

/// Metadata of a received sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
  pub kind: ChangeKind,
  /// `InstanceHandle::NIL` on keyless topics
  pub instance_handle: InstanceHandle,
  pub writer_guid: GUID,
  pub sequence_number: SequenceNumber,
  pub source_timestamp: Option<Timestamp>,
}

/// A sample as delivered to the application. `value` is `None` when the
/// change only tells that the instance was disposed or unregistered.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSample<D> {
  pub sample_info: SampleInfo,
  pub value: Option<D>,
}

impl<D> DataSample<D> {
  pub fn sample_info(&self) -> &SampleInfo {
    &self.sample_info
  }

  pub fn value(&self) -> Option<&D> {
    self.value.as_ref()
  }

  pub fn into_value(self) -> Option<D> {
    self.value
  }
}

/// DDS DataReader
///
/// The protocol side stores received changes into the reader history in
/// order. A `DataReader` takes them from there and decodes them with `DA`.
///
/// The reader can be registered to a mio `Poll`. It becomes readable when
/// new samples arrive.
pub struct DataReader<D, DA: DeserializerAdapter<D>> {
  data_phantom: PhantomData<D>,
  de_phantom: PhantomData<DA>,
  my_subscriber: Subscriber,
  my_topic: Topic,
  qos_policy: QosPolicies,
  my_guid: GUID,
  cache: Arc<HistoryCache>,
  notification_receiver: mio_channel::Receiver<()>,
  status_receiver: StatusReceiver<DataReaderStatus>,
  discovery_command: mio_channel::SyncSender<DiscoveryCommand>,
}

impl<D, DA> Drop for DataReader<D, DA>
where
  DA: DeserializerAdapter<D>,
{
  fn drop(&mut self) {
    self.my_subscriber.remove_reader(self.my_guid);

    if self.my_guid.entity_id.kind().is_built_in() {
      return;
    }

    match self
      .discovery_command
      .send(DiscoveryCommand::RemoveLocalReader { guid: self.my_guid })
    {
      Ok(_) => {}
      Err(SendError::Disconnected(_)) => {
        debug!("Failed to send REMOVE_LOCAL_READER DiscoveryCommand: Disconnected.");
      }
      Err(e) => error!("Failed to send REMOVE_LOCAL_READER DiscoveryCommand. {:?}", e),
    }
  }
}

impl<D, DA> DataReader<D, DA>
where
  DA: DeserializerAdapter<D>,
{
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    subscriber: Subscriber,
    topic: Topic,
    qos: QosPolicies,
    guid: GUID,
    cache: Arc<HistoryCache>,
    notification_receiver: mio_channel::Receiver<()>,
    status_receiver: StatusReceiver<DataReaderStatus>,
    discovery_command: mio_channel::SyncSender<DiscoveryCommand>,
  ) -> DataReader<D, DA> {
    DataReader {
      data_phantom: PhantomData,
      de_phantom: PhantomData,
      my_subscriber: subscriber,
      my_topic: topic,
      qos_policy: qos,
      my_guid: guid,
      cache,
      notification_receiver,
      status_receiver,
      discovery_command,
    }
  }

  pub fn guid(&self) -> GUID {
    self.my_guid
  }

  pub fn topic(&self) -> &Topic {
    &self.my_topic
  }

  pub fn qos(&self) -> &QosPolicies {
    &self.qos_policy
  }

  /// Removes the oldest unread sample from the reader history and returns it.
  ///
  /// `Ok(None)` means there is nothing to read.
  pub fn take_next_sample(&self) -> Result<Option<DataSample<D>>> {
    self.drain_notifications();
    self.cache.take_next().map(Self::decode).transpose()
  }

  /// Returns the oldest unread sample and marks it read. It stays in the
  /// history until evicted.
  pub fn read_next_sample(&self) -> Result<Option<DataSample<D>>> {
    self.drain_notifications();
    self.cache.read_next().map(Self::decode).transpose()
  }

  /// Takes at most `max_samples` unread samples, oldest first.
  pub fn take(&self, max_samples: usize) -> Result<Vec<DataSample<D>>> {
    self.drain_notifications();
    let mut result = Vec::new();
    while result.len() < max_samples {
      match self.cache.take_next() {
        Some(cc) => result.push(Self::decode(cc)?),
        None => break,
      }
    }
    Ok(result)
  }

  /// Number of samples received, but not yet read or taken.
  pub fn unread_count(&self) -> usize {
    self.cache.unread_count()
  }

  /// Blocks until there is something unread, or `timeout` passes.
  /// Returns `true` if samples are available.
  pub fn wait_for_unread_samples(&self, timeout: Duration) -> bool {
    self.cache.wait_for_unread(timeout)
  }

  // Readiness is edge-triggered. Empty the channel, so that the next sample
  // produces a new event.
  fn drain_notifications(&self) {
    while self.notification_receiver.try_recv().is_ok() {}
  }

  fn decode(cc: CacheChange) -> Result<DataSample<D>> {
    let value = match (cc.kind, &cc.data_value) {
      (ChangeKind::Alive, Some(payload)) => {
        let encoding = payload.representation_identifier;
        if !DA::supported_encodings().contains(&encoding) {
          warn!(
            "Sample {:?} from {:?} has unsupported encoding {:?}",
            cc.sequence_number, cc.writer_guid, encoding
          );
          return Err(Error::Serialization {
            reason: format!("Unsupported encoding {:?}", encoding),
          });
        }
        let value = DA::from_bytes(&payload.value, encoding).map_err(|e| Error::Serialization {
          reason: e.to_string(),
        })?;
        Some(value)
      }
      (ChangeKind::Alive, None) => {
        warn!(
          "Alive sample {:?} from {:?} without data",
          cc.sequence_number, cc.writer_guid
        );
        return Err(Error::Serialization {
          reason: "Alive sample without data".to_string(),
        });
      }
      _ => None,
    };
    Ok(DataSample {
      sample_info: SampleInfo {
        kind: cc.kind,
        instance_handle: cc.instance_handle,
        writer_guid: cc.writer_guid,
        sequence_number: cc.sequence_number,
        source_timestamp: cc.source_timestamp,
      },
      value,
    })
  }
}

// Not part of DDS: DataReaders are mio Evented, so that the application and
// the discovery thread can poll them.
impl<D, DA> Evented for DataReader<D, DA>
where
  DA: DeserializerAdapter<D>,
{
  fn register(&self, poll: &Poll, token: Token, interest: Ready, opts: PollOpt) -> io::Result<()> {
    self
      .notification_receiver
      .register(poll, token, interest, opts)
  }

  fn reregister(
    &self,
    poll: &Poll,
    token: Token,
    interest: Ready,
    opts: PollOpt,
  ) -> io::Result<()> {
    self
      .notification_receiver
      .reregister(poll, token, interest, opts)
  }

  fn deregister(&self, poll: &Poll) -> io::Result<()> {
    self.notification_receiver.deregister(poll)
  }
}

impl<D, DA> StatusEvented<DataReaderStatus> for DataReader<D, DA>
where
  DA: DeserializerAdapter<D>,
{
  fn as_status_evented(&mut self) -> &dyn Evented {
    self.status_receiver.as_status_evented()
  }

  fn try_recv_status(&self) -> Option<DataReaderStatus> {
    self.status_receiver.try_recv_status()
  }
}
