use crate::{dds::qos::QosPolicies, discovery::matching::TopicDescriptor};

/// Type of topic
///
/// There are topics with and without key. Keyed topics have instances, and
/// their samples carry an instance handle computed from the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TopicKind {
  NoKey,
  WithKey,
}

/// DDS Topic
///
/// A Topic only names the data and its type. It does not own any samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Topic {
  name: String,
  type_name: String,
  kind: TopicKind,
  qos: QosPolicies,
}

impl Topic {
  pub(crate) fn new(name: &str, type_name: &str, qos: &QosPolicies, kind: TopicKind) -> Topic {
    Topic {
      name: name.to_string(),
      type_name: type_name.to_string(),
      kind,
      qos: qos.clone(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn type_name(&self) -> &str {
    &self.type_name
  }

  pub fn kind(&self) -> TopicKind {
    self.kind
  }

  pub fn qos(&self) -> &QosPolicies {
    &self.qos
  }

  pub fn is_keyed(&self) -> bool {
    self.kind == TopicKind::WithKey
  }

  /// What matching compares against the remote endpoints.
  pub(crate) fn descriptor(&self) -> TopicDescriptor {
    TopicDescriptor::new(&self.name, &self.type_name, self.is_keyed())
  }
}
