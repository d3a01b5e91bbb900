//! Advertisement matching.
//!
//! Decides whether an advertising peripheral is the trainer described by a
//! [`TrainerProfile`].

use uuid::Uuid;

use crate::config::TrainerProfile;

/// The parts of an advertisement the locator looks at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Advertisement {
    /// Platform identifier of the peripheral.
    pub identifier: String,
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

impl Advertisement {
    /// Name for logs: the local name, or the identifier when unnamed.
    pub fn display_name(&self) -> &str {
        self.local_name.as_deref().unwrap_or(&self.identifier)
    }
}

impl AsRef<Advertisement> for Advertisement {
    fn as_ref(&self) -> &Advertisement {
        self
    }
}

/// Why an advertisement matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    /// It advertises the profile's service UUID.
    Service,
    /// Its local name contains the profile's name pattern.
    Name,
}

/// Filter predicate built from a trainer profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    service: Option<Uuid>,
    name_pattern: Option<String>,
}

impl DeviceFilter {
    /// Build a filter from a profile.
    pub fn from_profile(profile: &TrainerProfile) -> Self {
        Self {
            service: profile.advertised_service,
            name_pattern: profile
                .name_pattern
                .as_ref()
                .filter(|p| !p.is_empty())
                .cloned(),
        }
    }

    /// Check an advertisement. Service match wins over name match.
    pub fn check(&self, advertisement: &Advertisement) -> Option<MatchReason> {
        if let Some(service) = self.service {
            if advertisement.services.contains(&service) {
                return Some(MatchReason::Service);
            }
        }

        match (&self.name_pattern, &advertisement.local_name) {
            (Some(pattern), Some(name)) if name.contains(pattern.as_str()) => {
                Some(MatchReason::Name)
            }
            _ => None,
        }
    }

    /// Check if an advertisement matches.
    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        self.check(advertisement).is_some()
    }
}
