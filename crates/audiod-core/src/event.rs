use crate::types::{DeviceDescriptor, DeviceRole, PrivacyClass};

pub type SessionId = u64;

/// Named subsets the device manager keeps its devices in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    CommRender(PrivacyClass),
    CommCapture(PrivacyClass),
    MediaRender(PrivacyClass),
    MediaCapture(PrivacyClass),
    Capture(PrivacyClass),
    RemoteRender,
    RemoteCapture,
}

impl Partition {
    pub const ALL: [Partition; 12] = [
        Partition::CommRender(PrivacyClass::Public),
        Partition::CommRender(PrivacyClass::Private),
        Partition::CommCapture(PrivacyClass::Public),
        Partition::CommCapture(PrivacyClass::Private),
        Partition::MediaRender(PrivacyClass::Public),
        Partition::MediaRender(PrivacyClass::Private),
        Partition::MediaCapture(PrivacyClass::Public),
        Partition::MediaCapture(PrivacyClass::Private),
        Partition::Capture(PrivacyClass::Public),
        Partition::Capture(PrivacyClass::Private),
        Partition::RemoteRender,
        Partition::RemoteCapture,
    ];

    pub fn role(self) -> DeviceRole {
        match self {
            Partition::CommRender(_) | Partition::MediaRender(_) | Partition::RemoteRender => {
                DeviceRole::Output
            }
            _ => DeviceRole::Input,
        }
    }

    /// Remote partitions carry no privacy class.
    pub fn privacy(self) -> Option<PrivacyClass> {
        match self {
            Partition::CommRender(p)
            | Partition::CommCapture(p)
            | Partition::MediaRender(p)
            | Partition::MediaCapture(p)
            | Partition::Capture(p) => Some(p),
            Partition::RemoteRender | Partition::RemoteCapture => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceChangeKind {
    Connected,
    Reconnected,
    Disconnected,
}

/// One mutation of the device set, stamped with the generation it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceChange {
    pub generation: u64,
    pub kind: DeviceChangeKind,
    pub device: DeviceDescriptor,
    pub partitions: Vec<Partition>,
}

impl DeviceChange {
    pub fn touches_role(&self, role: DeviceRole) -> bool {
        self.partitions.iter().any(|p| p.role() == role)
    }
}

/// Reported by a session to whoever owns its routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Invalidated { session_id: SessionId, reason: String },
    Released { session_id: SessionId },
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::Invalidated { session_id, .. }
            | SessionEvent::Released { session_id } => *session_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotification {
    DeviceChanged {
        session_id: SessionId,
        previous: DeviceDescriptor,
        current: DeviceDescriptor,
    },
    Teardown {
        session_id: SessionId,
        reason: String,
    },
}

/// Pushed to parameter listeners; `network_id` is set for remote parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterChange {
    pub network_id: Option<String>,
    pub key: String,
    pub condition: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceType, DeviceRole};

    #[test]
    fn test_partition_roles() {
        assert_eq!(
            Partition::MediaRender(PrivacyClass::Public).role(),
            DeviceRole::Output
        );
        assert_eq!(Partition::RemoteCapture.role(), DeviceRole::Input);
        assert_eq!(Partition::RemoteRender.privacy(), None);
        assert_eq!(
            Partition::Capture(PrivacyClass::Private).privacy(),
            Some(PrivacyClass::Private)
        );
    }

    #[test]
    fn test_device_change_touches_role() {
        let change = DeviceChange {
            generation: 1,
            kind: DeviceChangeKind::Connected,
            device: DeviceDescriptor::new(DeviceType::Speaker, DeviceRole::Output),
            partitions: vec![Partition::MediaRender(PrivacyClass::Public)],
        };
        assert!(change.touches_role(DeviceRole::Output));
        assert!(!change.touches_role(DeviceRole::Input));
    }
}
