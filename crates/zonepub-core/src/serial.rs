//! Date-based SOA serial allocation.
//!
//! Policy: `candidate = YYYYMMDD * 100`; use it if it exceeds the previous
//! serial, otherwise `previous + 1`. Serials never wrap: running out of
//! 32-bit range is a policy violation, not an RFC 1982 rollover.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use tracing::{debug, warn};
use zonepub_state::PublishState;

use crate::error::SerialPolicyViolation;
use crate::model::{ChangeSet, ZoneArtifact};
use crate::zonefile;

/// `YYYYMMDD00` for `date`, if it fits in 32 bits.
pub fn date_serial(date: NaiveDate) -> Option<u32> {
    let year = u64::try_from(date.year()).ok()?;
    let ymd = year * 10_000 + u64::from(date.month()) * 100 + u64::from(date.day());
    u32::try_from(ymd * 100).ok()
}

/// Next serial after `previous` on `today`.
pub fn next_serial(
    zone: &str,
    previous: u32,
    today: NaiveDate,
) -> Result<u32, SerialPolicyViolation> {
    let overflow = || SerialPolicyViolation::Overflow {
        zone: zone.to_string(),
        previous,
    };

    let next = match date_serial(today) {
        Some(candidate) if candidate > previous => candidate,
        Some(_) => previous.checked_add(1).ok_or_else(overflow)?,
        None => return Err(overflow()),
    };

    if next <= previous {
        return Err(SerialPolicyViolation::NotIncreased {
            zone: zone.to_string(),
            previous,
            next,
        });
    }
    Ok(next)
}

/// Assigns serials to a run's zones and embeds them in the zone content.
#[derive(Debug, Clone, Copy)]
pub struct SerialAllocator {
    today: NaiveDate,
}

impl SerialAllocator {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    /// Allocate serials for `zones` and return the updated serial map.
    ///
    /// Changed zones get `next_serial`; every other zone gets exactly the
    /// serial recorded in `state`. Entries for zones that are no longer in
    /// the tree are carried over untouched. On error nothing is returned and
    /// the caller must abort the run.
    pub fn allocate(
        &self,
        zones: &mut BTreeMap<String, ZoneArtifact>,
        changes: &ChangeSet,
        state: &PublishState,
    ) -> Result<BTreeMap<String, u32>, SerialPolicyViolation> {
        let mut serials = state.serials.clone();

        for (name, zone) in zones.iter_mut() {
            let previous = state.serial(name);
            let serial = match previous {
                Some(previous) if !changes.is_zone_changed(name) => previous,
                _ => {
                    let next = next_serial(name, previous.unwrap_or(0), self.today)?;
                    debug!(zone = %name, previous = previous.unwrap_or(0), next, "serial allocated");
                    next
                }
            };

            zone.serial = serial;
            match zonefile::embed_serial(&zone.content, serial) {
                Ok(content) => zone.content = content,
                Err(e) => warn!(zone = %name, error = %e, "serial not embedded"),
            }
            serials.insert(name.clone(), serial);
        }

        Ok(serials)
    }
}
