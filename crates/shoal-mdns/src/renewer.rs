//! TTL bookkeeping for cached resources.
//!
//! A renewed resource is re-queried as its TTL runs down and, if no
//! refresh arrives, redelivered to the agents with TTL zero so caches
//! converge on removal the same way they would for an explicit
//! goodbye record.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use crate::resource::{DnsType, Question, Resource, ResourceData};

/// Queries fire at these percentages of the TTL. Four chances to see
/// a refresh before the record expires at 100%.
const QUERY_FRACTIONS: [u32; 4] = [80, 85, 90, 95];

/// Records are distinct per rdata: two A records for one host, or the
/// PTR records of sibling instances, are tracked separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RenewKey {
    name: String,
    dns_type: DnsType,
    data: ResourceData,
}

struct RenewState {
    /// Bumped on every refresh; heap entries with a stale generation
    /// are ignored when popped.
    generation: u64,
    resource: Resource,
    expiry: Instant,
    /// Gap between successive query times, 5% of the TTL.
    interval: Duration,
    queries_remaining: u32,
    next_due: Instant,
}

struct HeapEntry {
    due: Instant,
    generation: u64,
    key: RenewKey,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.generation == other.generation
    }
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    // Reversed, so the BinaryHeap pops the earliest due time first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What a [`process`](Renewer::process) pass produced: questions to
/// send and expired resources to redeliver with TTL zero.
#[derive(Default)]
pub(crate) struct RenewActions {
    pub questions: Vec<Question>,
    pub expirations: Vec<Resource>,
}

#[derive(Default)]
pub(crate) struct Renewer {
    entries: HashMap<RenewKey, RenewState>,
    schedule: BinaryHeap<HeapEntry>,
    next_generation: u64,
}

impl Renewer {
    /// Start or refresh tracking of `resource`. A TTL of zero stops
    /// tracking: the record is being removed, not refreshed.
    pub fn renew(&mut self, now: Instant, resource: &Resource) {
        let dns_type = resource.dns_type();
        let key = RenewKey {
            name: resource.name.clone(),
            dns_type,
            data: resource.data.clone(),
        };
        // SRV and TXT are single-valued per name: a refresh with new
        // data supersedes whatever was tracked under the old data.
        if matches!(dns_type, DnsType::Srv | DnsType::Txt) {
            self.entries
                .retain(|existing, _| existing.name != key.name || existing.dns_type != dns_type);
        }
        if resource.time_to_live == 0 {
            self.entries.remove(&key);
            return;
        }

        let ttl = Duration::from_secs(u64::from(resource.time_to_live));
        let interval = ttl * 5 / 100;
        let next_due = now + ttl * QUERY_FRACTIONS[0] / 100;

        self.next_generation += 1;
        let generation = self.next_generation;
        self.entries.insert(
            key.clone(),
            RenewState {
                generation,
                resource: resource.clone(),
                expiry: now + ttl,
                interval,
                queries_remaining: QUERY_FRACTIONS.len() as u32,
                next_due,
            },
        );
        self.schedule.push(HeapEntry {
            due: next_due,
            generation,
            key,
        });
    }

    /// Earliest time [`process`](Renewer::process) has work to do.
    pub fn next_due(&self) -> Option<Instant> {
        self.schedule.peek().map(|entry| entry.due)
    }

    /// Run all bookkeeping due at or before `now`.
    pub fn process(&mut self, now: Instant) -> RenewActions {
        let mut actions = RenewActions::default();
        while let Some(entry) = self.schedule.peek() {
            if entry.due > now {
                break;
            }
            let entry = self.schedule.pop().unwrap();
            let Some(state) = self.entries.get_mut(&entry.key) else {
                continue;
            };
            if state.generation != entry.generation {
                // Refreshed since this entry was scheduled.
                continue;
            }

            if state.queries_remaining > 0 {
                state.queries_remaining -= 1;
                state.next_due = (state.next_due + state.interval).min(state.expiry);
                actions.questions.push(Question {
                    name: state.resource.name.clone(),
                    dns_type: state.resource.dns_type(),
                });
                self.schedule.push(HeapEntry {
                    due: state.next_due,
                    generation: state.generation,
                    key: entry.key,
                });
            } else {
                let mut expired = state.resource.clone();
                expired.time_to_live = 0;
                tracing::debug!(name = %expired.name, dns_type = ?expired.dns_type(), "resource expired");
                actions.expirations.push(expired);
                self.entries.remove(&entry.key);
            }
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr_resource(ttl: u32) -> Resource {
        Resource::ptr("_http._tcp.local.", "web._http._tcp.local.", ttl)
    }

    #[test]
    fn queries_fire_at_ttl_fractions_then_expire() {
        let start = Instant::now();
        let mut renewer = Renewer::default();
        renewer.renew(start, &ptr_resource(100));

        let mut query_offsets = Vec::new();
        let mut expired_at = None;
        for seconds in [80u64, 85, 90, 95, 100] {
            let actions = renewer.process(start + Duration::from_secs(seconds));
            for _ in &actions.questions {
                query_offsets.push(seconds);
            }
            if !actions.expirations.is_empty() {
                expired_at = Some(seconds);
                assert_eq!(actions.expirations[0].time_to_live, 0);
                assert_eq!(actions.expirations[0].name, "_http._tcp.local.");
            }
        }
        assert_eq!(query_offsets, vec![80, 85, 90, 95]);
        assert_eq!(expired_at, Some(100));
        assert_eq!(renewer.next_due(), None);
    }

    #[test]
    fn refresh_resets_the_schedule() {
        let start = Instant::now();
        let mut renewer = Renewer::default();
        renewer.renew(start, &ptr_resource(100));

        // Refresh just before the first query would fire.
        let refresh = start + Duration::from_secs(79);
        renewer.renew(refresh, &ptr_resource(100));

        // The original 80s entry is stale and produces nothing.
        let actions = renewer.process(start + Duration::from_secs(80));
        assert!(actions.questions.is_empty());
        assert!(actions.expirations.is_empty());

        // The refreshed schedule fires 80s after the refresh.
        let actions = renewer.process(refresh + Duration::from_secs(80));
        assert_eq!(actions.questions.len(), 1);
    }

    #[test]
    fn sibling_records_are_tracked_separately() {
        let start = Instant::now();
        let mut renewer = Renewer::default();
        let first = Resource::a("host1.local.", 100, "10.0.0.1".parse().unwrap());
        let second = Resource::a("host1.local.", 100, "10.0.0.2".parse().unwrap());
        renewer.renew(start, &first);
        renewer.renew(start, &second);

        // Only the first address keeps being refreshed.
        renewer.renew(start + Duration::from_secs(79), &first);

        let mut expired = Vec::new();
        for seconds in [80u64, 85, 90, 95, 100] {
            expired.extend(renewer.process(start + Duration::from_secs(seconds)).expirations);
        }
        assert_eq!(expired.len(), 1);
        assert_eq!(
            expired[0].data,
            ResourceData::A {
                address: "10.0.0.2".parse().unwrap()
            }
        );
    }

    #[test]
    fn srv_refresh_with_new_data_supersedes_the_old() {
        let start = Instant::now();
        let mut renewer = Renewer::default();
        let old = Resource::srv("web._http._tcp.local.", 100, 0, 0, 80, "host1.local.");
        let new = Resource::srv("web._http._tcp.local.", 100, 0, 0, 8080, "host1.local.");
        renewer.renew(start, &old);
        renewer.renew(start + Duration::from_secs(50), &new);

        // The old record's schedule is gone; nothing expires at its
        // original expiry.
        let actions = renewer.process(start + Duration::from_secs(100));
        assert!(actions.expirations.is_empty());
    }

    #[test]
    fn zero_ttl_stops_tracking() {
        let start = Instant::now();
        let mut renewer = Renewer::default();
        renewer.renew(start, &ptr_resource(100));
        renewer.renew(start, &ptr_resource(0));

        let actions = renewer.process(start + Duration::from_secs(200));
        assert!(actions.questions.is_empty());
        assert!(actions.expirations.is_empty());
    }
}
