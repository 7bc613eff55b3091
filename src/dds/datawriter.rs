use std::{
  marker::PhantomData,
  sync::{mpsc, Arc, Mutex},
  time::Duration,
};

use mio::Evented;
use mio_extras::channel::{self as mio_channel, SendError, TrySendError};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dds::{
    adapters::{Key, Keyed, SerializerAdapter},
    helpers::try_send_timeout,
    pubsub::Publisher,
    qos::{policy::Reliability, QosPolicies},
    result::{Error, Result},
    statusevents::{DataWriterStatus, StatusEvented, StatusReceiver},
    topic::Topic,
  },
  discovery::discovery::DiscoveryCommand,
  log_and_err_internal,
  messages::serialized_payload::{RepresentationIdentifier, SerializedPayload},
  rtps::writer::WriterCommand,
  structure::{
    cache_change::{CacheChange, ChangeKind},
    guid::GUID,
    history_cache::{HistoryCache, Rejected},
    instance_handle::InstanceHandle,
    sequence_number::SequenceNumber,
    time::Timestamp,
  },
};

/// DDS DataWriter
///
/// Samples are serialized with `SA` and stored into the writer history
/// synchronously, so that a full history is reported to the caller.
/// Transmission happens on the event loop thread.
///
/// Keyless topics use a data type whose key is `()`.
pub struct DataWriter<D: Keyed, SA: SerializerAdapter<D>> {
  data_phantom: PhantomData<D>,
  ser_phantom: PhantomData<SA>,
  my_publisher: Publisher,
  my_topic: Topic,
  qos_policy: QosPolicies,
  my_guid: GUID,
  cache: Arc<HistoryCache>,
  // Last sequence number handed out. Held locked across insert and notify,
  // so that the Writer sees changes in order.
  last_sequence_number: Mutex<SequenceNumber>,
  cc_upload: mio_channel::SyncSender<WriterCommand>,
  discovery_command: mio_channel::SyncSender<DiscoveryCommand>,
  status_receiver: StatusReceiver<DataWriterStatus>,
}

impl<D, SA> Drop for DataWriter<D, SA>
where
  D: Keyed,
  SA: SerializerAdapter<D>,
{
  fn drop(&mut self) {
    // Tell Publisher to drop the corresponding RTPS Writer
    self.my_publisher.remove_writer(self.my_guid);

    // Discovery owns the builtin writers. It must not wait on itself.
    if self.my_guid.entity_id.kind().is_built_in() {
      return;
    }

    // Notify Discovery that we are no longer
    match self
      .discovery_command
      .send(DiscoveryCommand::RemoveLocalWriter { guid: self.my_guid })
    {
      Ok(_) => {}

      // This is fairly normal at shutdown, as the other end is down already.
      Err(SendError::Disconnected(_cmd)) => {
        debug!("Failed to send REMOVE_LOCAL_WRITER DiscoveryCommand: Disconnected.");
      }
      // other errors must be taken more seriously
      Err(e) => error!(
        "Failed to send REMOVE_LOCAL_WRITER DiscoveryCommand. {:?}",
        e
      ),
    }
  }
}

impl<D, SA> DataWriter<D, SA>
where
  D: Keyed,
  SA: SerializerAdapter<D>,
{
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    publisher: Publisher,
    topic: Topic,
    qos: QosPolicies,
    guid: GUID,
    cache: Arc<HistoryCache>,
    cc_upload: mio_channel::SyncSender<WriterCommand>,
    discovery_command: mio_channel::SyncSender<DiscoveryCommand>,
    status_receiver: StatusReceiver<DataWriterStatus>,
  ) -> DataWriter<D, SA> {
    DataWriter {
      data_phantom: PhantomData,
      ser_phantom: PhantomData,
      my_publisher: publisher,
      my_topic: topic,
      qos_policy: qos,
      my_guid: guid,
      cache,
      last_sequence_number: Mutex::new(SequenceNumber::zero()),
      cc_upload,
      discovery_command,
      status_receiver,
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

  pub fn publisher(&self) -> &Publisher {
    &self.my_publisher
  }

  /// Writes single data instance to a topic.
  ///
  /// Fails with [`Error::OutOfResources`] if the history is KEEP_ALL and
  /// already holds `max_samples` (or, for keyed topics,
  /// `max_samples_per_instance` or `max_instances`) unacknowledged samples.
  pub fn write(&self, data: D, source_timestamp: Option<Timestamp>) -> Result<()> {
    let send_buffer = SA::to_bytes(&data).map_err(|e| Error::Serialization {
      reason: e.to_string(),
    })?;
    let payload = SerializedPayload::new_from_bytes(SA::output_encoding(), send_buffer);
    let instance = self.instance_handle_of(&data.key());
    self.add_change(ChangeKind::Alive, instance, Some(payload), source_timestamp)
  }

  /// Marks the instance of `key` disposed. Readers are told with a DATA
  /// that carries only the key hash and status info.
  pub fn dispose(&self, key: &D::K, source_timestamp: Option<Timestamp>) -> Result<()> {
    self.not_alive_change(ChangeKind::NotAliveDisposed, key, source_timestamp)
  }

  /// This writer will no longer update the instance of `key`.
  pub fn unregister_instance(&self, key: &D::K, source_timestamp: Option<Timestamp>) -> Result<()> {
    self.not_alive_change(ChangeKind::NotAliveUnregistered, key, source_timestamp)
  }

  fn not_alive_change(
    &self,
    kind: ChangeKind,
    key: &D::K,
    source_timestamp: Option<Timestamp>,
  ) -> Result<()> {
    if !self.my_topic.is_keyed() {
      return Error::precondition_not_met("Keyless topics have no instances to dispose");
    }
    // The serialized key travels as payload, too. Readers that do not
    // understand the key hash may still find the instance.
    let key_payload = SerializedPayload::new(RepresentationIdentifier::CDR_BE, key.serialize_key());
    self.add_change(
      kind,
      self.instance_handle_of(key),
      Some(key_payload),
      source_timestamp,
    )
  }

  fn instance_handle_of(&self, key: &D::K) -> InstanceHandle {
    if self.my_topic.is_keyed() {
      key.hash_key()
    } else {
      InstanceHandle::NIL
    }
  }

  fn add_change(
    &self,
    kind: ChangeKind,
    instance: InstanceHandle,
    payload: Option<SerializedPayload>,
    source_timestamp: Option<Timestamp>,
  ) -> Result<()> {
    let mut last_sn = self.last_sequence_number.lock()?;
    let sequence_number = last_sn.plus_1();
    let change = CacheChange::new(kind, self.my_guid, sequence_number, instance, payload)
      .with_source_timestamp(Some(source_timestamp.unwrap_or_else(Timestamp::now)));

    match self.cache.add_change(change) {
      Ok(()) => (),
      Err(Rejected::ResourceLimitsExceeded { reason }) => {
        warn!(
          "Write rejected: topic={:?} reason={:?}",
          self.my_topic.name(),
          reason
        );
        return Error::out_of_resources(&format!("{:?}", reason));
      }
      Err(Rejected::OutOfOrder { last }) => {
        return log_and_err_internal!(
          "Writer {:?} history already has {:?}, cannot add {:?}",
          self.my_guid,
          last,
          sequence_number
        );
      }
    }
    *last_sn = sequence_number;

    let timeout = match self.qos_policy.reliability() {
      Some(Reliability::Reliable { max_blocking_time }) => Some(max_blocking_time.to_std()),
      _ => None,
    };
    match try_send_timeout(
      &self.cc_upload,
      WriterCommand::NewChange { sequence_number },
      timeout,
    ) {
      Ok(()) => Ok(()),
      Err(TrySendError::Disconnected(_)) => Err(Error::AlreadyDeleted),
      Err(e) => {
        // The change is in the history. The protocol thread picks it up on
        // its next heartbeat or command.
        warn!(
          "Writer not notified of new data: topic={:?} reason={:?} timeout={:?}",
          self.my_topic.name(),
          e,
          timeout,
        );
        Ok(())
      }
    }
  }

  /// This operation blocks the calling thread until either all data written by
  /// the reliable DataWriter entities is acknowledged by all
  /// matched reliable DataReader entities, or else the duration specified by
  /// the `max_wait` parameter elapses, whichever happens first.
  ///
  /// If this DataWriter is not set to Reliable, or there are no matched
  /// DataReaders with Reliable QoS, the call succeeds immediately.
  ///
  /// Return values
  /// * `Ok(true)` - all acknowledged
  /// * `Ok(false)`- timed out waiting for acknowledgments
  /// * `Err(_)` - something went wrong
  pub fn wait_for_acknowledgments(&self, max_wait: Duration) -> Result<bool> {
    match &self.qos_policy.reliability {
      Some(Reliability::BestEffort) => Ok(true),
      None | Some(Reliability::Reliable { .. }) => {
        let (acked_sender, acked_receiver) = mpsc::sync_channel::<()>(1);
        match self
          .cc_upload
          .try_send(WriterCommand::WaitForAcknowledgments {
            all_acked: acked_sender,
          }) {
          Ok(()) => (),
          Err(TrySendError::Disconnected(_)) => return Err(Error::AlreadyDeleted),
          Err(e) => {
            warn!("wait_for_acknowledgments: writer busy: {:?}", e);
            return Ok(false);
          }
        }
        match acked_receiver.recv_timeout(max_wait) {
          // got reply
          Ok(()) => Ok(true),
          Err(mpsc::RecvTimeoutError::Timeout) => Ok(false),
          Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::AlreadyDeleted),
        }
      }
    }
  }

  /// Number of samples currently kept in the writer history.
  pub fn history_len(&self) -> usize {
    self.cache.len()
  }
}

impl<D, SA> StatusEvented<DataWriterStatus> for DataWriter<D, SA>
where
  D: Keyed,
  SA: SerializerAdapter<D>,
{
  fn as_status_evented(&mut self) -> &dyn Evented {
    self.status_receiver.as_status_evented()
  }

  fn try_recv_status(&self) -> Option<DataWriterStatus> {
    self.status_receiver.try_recv_status()
  }
}
