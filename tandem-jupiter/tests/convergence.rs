//! Convergence tests for the Jupiter engine driven through a hub core.
//!
//! Clients and the hub exchange requests over in-memory FIFO links that
//! are drained in a randomly chosen order.

use proptest::prelude::*;
use std::collections::{BTreeMap, VecDeque};
use tandem_jupiter::*;

const SITES: [SiteId; 3] = [SiteId(1), SiteId(2), SiteId(3)];

fn doc() -> DocumentId {
    DocumentId::new("shared.txt")
}

// =============================================================================
// Harness
// =============================================================================

struct Site {
    client: DocumentClient,
    text: String,
    uplink: VecDeque<Request>,
    downlink: VecDeque<Request>,
}

struct Network {
    core: HubCore,
    hub_text: String,
    sites: BTreeMap<SiteId, Site>,
}

impl Network {
    fn new(initial: &str) -> Self {
        let mut core = HubCore::new(doc(), SiteId(0));
        let mut sites = BTreeMap::new();
        for site in SITES {
            core.admit(site);
            sites.insert(
                site,
                Site {
                    client: DocumentClient::new(site, SiteId(0)),
                    text: initial.to_string(),
                    uplink: VecDeque::new(),
                    downlink: VecDeque::new(),
                },
            );
        }
        Self {
            core,
            hub_text: initial.to_string(),
            sites,
        }
    }

    fn edit(&mut self, site: SiteId, operation: Operation) {
        let state = self.sites.get_mut(&site).unwrap();
        operation.apply_in_place(&mut state.text).unwrap();
        let request = state.client.generate(&doc(), operation);
        state.uplink.push_back(request);
    }

    fn deliver_up(&mut self, site: SiteId) -> bool {
        let Some(request) = self.sites.get_mut(&site).unwrap().uplink.pop_front() else {
            return false;
        };
        let broadcast = self.core.apply(&request).unwrap();
        broadcast
            .operation
            .apply_in_place(&mut self.hub_text)
            .unwrap();
        for (target, outgoing) in broadcast.requests {
            self.sites
                .get_mut(&target)
                .unwrap()
                .downlink
                .push_back(outgoing);
        }
        true
    }

    fn deliver_down(&mut self, site: SiteId) -> bool {
        let state = self.sites.get_mut(&site).unwrap();
        let Some(request) = state.downlink.pop_front() else {
            return false;
        };
        let before = state.client.get(&doc()).map(|d| d.jupiter().vector_time());
        let operation = state.client.receive(&request).unwrap();
        let after = state.client.get(&doc()).unwrap().jupiter().vector_time();
        if let Some(before) = before {
            assert!(after.dominates(&before));
        }
        operation.apply_in_place(&mut state.text).unwrap();
        true
    }

    fn flush(&mut self) {
        loop {
            let mut progressed = false;
            for site in SITES {
                while self.deliver_up(site) {
                    progressed = true;
                }
            }
            for site in SITES {
                while self.deliver_down(site) {
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    }
}

/// Build an operation that is valid on `text`
fn make_operation(text: &str, kind: u8, a: usize, b: usize, inserted: &str) -> Operation {
    let len = text.chars().count();
    if kind % 3 != 0 || len == 0 {
        Operation::insert(a % (len + 1), inserted)
    } else {
        let start = a % len;
        let end = (start + 1 + b % 3).min(len);
        let deleted: String = text.chars().skip(start).take(end - start).collect();
        Operation::delete(start, deleted)
    }
}

#[derive(Debug, Clone)]
enum Step {
    Edit {
        site: usize,
        kind: u8,
        a: usize,
        b: usize,
        text: String,
    },
    Up(usize),
    Down(usize),
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..3usize, any::<u8>(), any::<usize>(), any::<usize>(), "[a-z]{1,3}").prop_map(
            |(site, kind, a, b, text)| Step::Edit {
                site,
                kind,
                a,
                b,
                text
            }
        ),
        (0..3usize).prop_map(Step::Up),
        (0..3usize).prop_map(Step::Down),
    ]
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_concurrent_inserts_converge_with_server_order() {
    let mut network = Network::new("0123456789");
    network.edit(SiteId(1), Operation::insert(5, "X"));
    network.edit(SiteId(2), Operation::insert(5, "Y"));

    // site 2 reaches the hub first, so its insert is ordered first
    network.deliver_up(SiteId(2));
    network.deliver_up(SiteId(1));
    network.flush();

    assert_eq!(network.hub_text, "01234YX56789");
    for site in network.sites.values() {
        assert_eq!(site.text, network.hub_text);
    }
}

#[test]
fn test_delete_split_by_concurrent_insert_converges() {
    let mut network = Network::new("abcdefgh");
    network.edit(SiteId(1), Operation::delete(1, "bcde"));
    network.edit(SiteId(2), Operation::insert(3, "XY"));
    network.edit(SiteId(3), Operation::delete(6, "g"));
    network.flush();

    assert_eq!(network.hub_text, "aXYfh");
    for site in network.sites.values() {
        assert_eq!(site.text, network.hub_text);
        assert_eq!(site.client.get(&doc()).unwrap().jupiter().pending_count(), 0);
    }
}

#[test]
fn test_request_acknowledging_unsent_operation_is_rejected() {
    let mut server = Jupiter::server(doc(), SiteId(0));
    let request = Request::new(doc(), SiteId(1), VectorTime::new(0, 1), Operation::insert(0, "a"));

    assert_eq!(
        server.receive_request(&request),
        Err(TransformationError::UnsentAcknowledgement { remote: 1, local: 0 })
    );
    assert_eq!(server.vector_time(), VectorTime::zero());
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_all_sites_converge(steps in prop::collection::vec(arb_step(), 1..40)) {
        let mut network = Network::new("the quick brown fox");
        for step in steps {
            match step {
                Step::Edit { site, kind, a, b, text } => {
                    let site = SITES[site];
                    let current = network.sites[&site].text.clone();
                    network.edit(site, make_operation(&current, kind, a, b, &text));
                }
                Step::Up(site) => {
                    network.deliver_up(SITES[site]);
                }
                Step::Down(site) => {
                    network.deliver_down(SITES[site]);
                }
            }
        }
        network.flush();

        for site in network.sites.values() {
            prop_assert_eq!(&site.text, &network.hub_text);
        }
    }

    #[test]
    fn prop_vector_time_never_decreases(
        sent in 0u64..5,
        extra in 1u64..5,
        received in 0u64..5,
    ) {
        let mut client = Jupiter::client(doc(), SiteId(1));
        let mut last = client.vector_time();
        for i in 0..sent {
            client.generate_request(Operation::insert(0, format!("{}", i)));
            prop_assert!(client.vector_time().dominates(&last));
            last = client.vector_time();
        }

        let mut server = Jupiter::server(doc(), SiteId(0));
        for _ in 0..received {
            let request = server.generate_request(Operation::insert(0, "s"));
            client.receive_request(&request).unwrap();
            prop_assert!(client.vector_time().dominates(&last));
            last = client.vector_time();
        }

        // acknowledging more than was ever sent is always rejected
        let bogus = Request::new(
            doc(),
            SiteId(0),
            VectorTime::new(received, sent + extra),
            Operation::insert(0, "z"),
        );
        let result = client.receive_request(&bogus);
        prop_assert!(
            matches!(result, Err(TransformationError::UnsentAcknowledgement { .. })),
            "unexpected result {:?}",
            result
        );
        prop_assert_eq!(client.vector_time(), last);
    }

    #[test]
    fn prop_acknowledged_operations_are_discarded(sent in 1u64..8, acked in 0u64..8) {
        let acked = acked.min(sent);
        let mut client = Jupiter::client(doc(), SiteId(1));
        for _ in 0..sent {
            client.generate_request(Operation::insert(0, "c"));
        }

        let request = Request::new(doc(), SiteId(0), VectorTime::new(0, acked), Operation::noop());
        client.receive_request(&request).unwrap();

        prop_assert!(client.pending().all(|pending| pending.local_count >= acked));
        prop_assert_eq!(client.pending_count() as u64, sent - acked);
    }
}
