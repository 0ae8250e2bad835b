//! Output owner election.
//!
//! Only clients that positively reported `Capable` are eligible. Among them the
//! current owner is kept when possible, otherwise the earliest registration
//! wins (registration sequence, then client id).

use super::registry::ClientRegistration;
use crate::protocol::{Capability, ClientId};

pub fn elect<'a, I>(previous_owner: Option<&str>, registrations: I) -> Option<ClientId>
where
    I: IntoIterator<Item = &'a ClientRegistration>,
{
    let mut earliest: Option<&ClientRegistration> = None;
    for registration in registrations {
        if registration.capability != Capability::Capable {
            continue;
        }
        if previous_owner == Some(registration.client_id.as_str()) {
            return Some(registration.client_id.clone());
        }
        let is_earlier = match earliest {
            None => true,
            Some(current) => {
                (registration.registration_seq, &registration.client_id)
                    < (current.registration_seq, &current.client_id)
            }
        };
        if is_earlier {
            earliest = Some(registration);
        }
    }
    earliest.map(|registration| registration.client_id.clone())
}
