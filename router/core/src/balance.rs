//! The load-balancer family.
//!
//! Each policy is a small value type exposing only `get_backend`. Balancers
//! pull the live upstream set through an [`UpstreamFetcher`] on every call;
//! the metrics-aware policies additionally consult the shared usage index
//! kept warm by a background refresher they own.

use crate::{
    quantity::Quantity,
    usage::{PodUsage, Reader},
};
use parking_lot::Mutex;
use rand::Rng;
use std::{fmt, str::FromStr};

/// Produces the current backend address list for one function.
///
/// A successful fetch is never empty, so callers may index into the list
/// without further checks.
pub trait UpstreamFetcher: Send + Sync + 'static {
    fn fetch_upstream(&self) -> Result<Vec<String>, FetchError>;
}

/// Selects one backend per call.
pub trait LoadBalancer: Send + Sync + 'static {
    fn get_backend(&self) -> Result<String, FetchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("endpoints \"{name}.{namespace}\" not found")]
    NotFound { namespace: String, name: String },

    #[error("no subsets available for \"{name}.{namespace}\"")]
    NoSubsets { namespace: String, name: String },

    #[error("no addresses in subset for \"{name}.{namespace}\"")]
    NoAddresses { namespace: String, name: String },

    #[error("no available endpoint for function")]
    Empty,

    #[error("error listing \"{name}.{namespace}\": {source}")]
    Lister {
        namespace: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// The recognized load-balance policy tags.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Policy {
    #[default]
    RoundRobin,
    Random,
    WeightedRoundRobin,
    LeastCpu,
    LeastMem,
    PowerOfTwoCpu,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown load balance policy: {0}")]
pub struct UnknownPolicy(String);

impl FromStr for Policy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RoundRobin" => Ok(Self::RoundRobin),
            "Random" => Ok(Self::Random),
            "WeightedRR" => Ok(Self::WeightedRoundRobin),
            "LeastCPU" => Ok(Self::LeastCpu),
            "LeastMem" => Ok(Self::LeastMem),
            "LessCPU" => Ok(Self::PowerOfTwoCpu),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RoundRobin => "RoundRobin",
            Self::Random => "Random",
            Self::WeightedRoundRobin => "WeightedRR",
            Self::LeastCpu => "LeastCPU",
            Self::LeastMem => "LeastMem",
            Self::PowerOfTwoCpu => "LessCPU",
        })
    }
}

/// Aborts the owned background refresher when its balancer is dropped, so a
/// balancer displaced from the resolver cache does not leak its task.
#[derive(Debug)]
pub struct RefreshGuard(tokio::task::JoinHandle<()>);

impl RefreshGuard {
    pub fn new(task: tokio::task::JoinHandle<()>) -> Self {
        Self(task)
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// === RoundRobin ===

pub struct RoundRobin<F> {
    fetcher: F,
    last: Mutex<Option<usize>>,
}

impl<F> RoundRobin<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            last: Mutex::new(None),
        }
    }
}

impl<F: UpstreamFetcher> LoadBalancer for RoundRobin<F> {
    fn get_backend(&self) -> Result<String, FetchError> {
        let mut last = self.last.lock();
        let upstreams = non_empty(self.fetcher.fetch_upstream()?)?;

        let target = match *last {
            Some(prev) => (prev + 1) % upstreams.len(),
            None => 0,
        };
        *last = Some(target);
        Ok(upstreams[target].clone())
    }
}

// === Random ===

pub struct Random<F> {
    fetcher: F,
}

impl<F> Random<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

impl<F: UpstreamFetcher> LoadBalancer for Random<F> {
    fn get_backend(&self) -> Result<String, FetchError> {
        let upstreams = non_empty(self.fetcher.fetch_upstream()?)?;
        let target = rand::thread_rng().gen_range(0..upstreams.len());
        Ok(upstreams[target].clone())
    }
}

// === WeightedRoundRobin ===

/// The base weight pattern, cycled out to the current upstream count so
/// every backend stays reachable as the deployment scales.
const WEIGHT_PATTERN: &[u32] = &[1, 1, 3];

pub struct WeightedRoundRobin<F> {
    fetcher: F,
    state: Mutex<WrrState>,
}

#[derive(Debug, Default)]
struct WrrState {
    weights: Vec<u32>,
    round: u32,
    cur: usize,
}

impl<F> WeightedRoundRobin<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            state: Mutex::new(WrrState::default()),
        }
    }
}

impl<F: UpstreamFetcher> LoadBalancer for WeightedRoundRobin<F> {
    fn get_backend(&self) -> Result<String, FetchError> {
        let mut state = self.state.lock();
        let upstreams = non_empty(self.fetcher.fetch_upstream()?)?;
        let n = upstreams.len();

        if state.weights.len() != n {
            state.weights = WEIGHT_PATTERN.iter().copied().cycle().take(n).collect();
            state.round = 0;
            state.cur = 0;
        }
        let max_weight = *state.weights.iter().max().expect("weights are non-empty");

        // Scan forward from the cursor, wrapping into the next round at the
        // end of the queue. A backend is emitted in every round below its
        // weight, so over one super-round each backend's frequency equals its
        // weight.
        let target = loop {
            if state.cur >= n {
                state.cur = 0;
                state.round = (state.round + 1) % max_weight;
            }
            let i = state.cur;
            state.cur += 1;
            if state.weights[i] > state.round {
                break i;
            }
        };
        Ok(upstreams[target].clone())
    }
}

// === LeastCpu / LeastMem ===

pub struct LeastCpu<F> {
    fetcher: F,
    usage: Reader,
    _refresher: Option<RefreshGuard>,
}

impl<F> LeastCpu<F> {
    pub fn new(fetcher: F, usage: Reader, refresher: Option<RefreshGuard>) -> Self {
        Self {
            fetcher,
            usage,
            _refresher: refresher,
        }
    }
}

impl<F: UpstreamFetcher> LoadBalancer for LeastCpu<F> {
    fn get_backend(&self) -> Result<String, FetchError> {
        let upstreams = non_empty(self.fetcher.fetch_upstream()?)?;
        let target = self
            .usage
            .with_snapshot(|usage| min_usage_target(&upstreams, usage, |u| &u.cpu));
        Ok(upstreams[target].clone())
    }
}

pub struct LeastMem<F> {
    fetcher: F,
    usage: Reader,
    _refresher: Option<RefreshGuard>,
}

impl<F> LeastMem<F> {
    pub fn new(fetcher: F, usage: Reader, refresher: Option<RefreshGuard>) -> Self {
        Self {
            fetcher,
            usage,
            _refresher: refresher,
        }
    }
}

impl<F: UpstreamFetcher> LoadBalancer for LeastMem<F> {
    fn get_backend(&self) -> Result<String, FetchError> {
        let upstreams = non_empty(self.fetcher.fetch_upstream()?)?;
        let target = self
            .usage
            .with_snapshot(|usage| min_usage_target(&upstreams, usage, |u| &u.memory));
        Ok(upstreams[target].clone())
    }
}

/// Index of the upstream with minimal usage under `key`; an IP without a
/// sample reads as zero, and ties go to the smallest index.
fn min_usage_target(
    upstreams: &[String],
    usage: &ahash::AHashMap<String, PodUsage>,
    key: impl Fn(&PodUsage) -> &Quantity,
) -> usize {
    let zero = PodUsage::default();
    let mut target = 0;
    let mut min = *key(usage.get(&upstreams[0]).unwrap_or(&zero));
    for (i, backend) in upstreams.iter().enumerate() {
        let sample = usage.get(backend).unwrap_or(&zero);
        tracing::trace!(ip = %backend, cpu = %sample.cpu, memory = %sample.memory);
        let candidate = key(sample);
        if *candidate < min {
            target = i;
            min = *candidate;
        }
    }
    target
}

// === PowerOfTwoCpu ===

pub struct PowerOfTwoCpu<F> {
    fetcher: F,
    usage: Reader,
    _refresher: Option<RefreshGuard>,
}

impl<F> PowerOfTwoCpu<F> {
    pub fn new(fetcher: F, usage: Reader, refresher: Option<RefreshGuard>) -> Self {
        Self {
            fetcher,
            usage,
            _refresher: refresher,
        }
    }
}

impl<F: UpstreamFetcher> LoadBalancer for PowerOfTwoCpu<F> {
    fn get_backend(&self) -> Result<String, FetchError> {
        let upstreams = non_empty(self.fetcher.fetch_upstream()?)?;
        let n = upstreams.len();
        let (t1, t2) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(0..n), rng.gen_range(0..n))
        };

        let target = self.usage.with_snapshot(|usage| {
            let zero = PodUsage::default();
            let c1 = &usage.get(&upstreams[t1]).unwrap_or(&zero).cpu;
            let c2 = &usage.get(&upstreams[t2]).unwrap_or(&zero).cpu;
            if c1 < c2 {
                t1
            } else {
                t2
            }
        });
        Ok(upstreams[target].clone())
    }
}

fn non_empty(upstreams: Vec<String>) -> Result<Vec<String>, FetchError> {
    if upstreams.is_empty() {
        return Err(FetchError::Empty);
    }
    Ok(upstreams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::pair;
    use ahash::AHashMap as HashMap;

    struct FakeUpstreams(Vec<String>);

    impl FakeUpstreams {
        fn new(ips: &[&str]) -> Self {
            Self(ips.iter().map(|ip| ip.to_string()).collect())
        }
    }

    impl UpstreamFetcher for FakeUpstreams {
        fn fetch_upstream(&self) -> Result<Vec<String>, FetchError> {
            Ok(self.0.clone())
        }
    }

    struct FailingUpstreams;

    impl UpstreamFetcher for FailingUpstreams {
        fn fetch_upstream(&self) -> Result<Vec<String>, FetchError> {
            Err(FetchError::NoSubsets {
                namespace: "openfaas-fn".to_string(),
                name: "figlet".to_string(),
            })
        }
    }

    fn cpu_snapshot(entries: &[(&str, &str)]) -> HashMap<String, PodUsage> {
        entries
            .iter()
            .map(|(ip, cpu)| {
                (
                    ip.to_string(),
                    PodUsage {
                        cpu: cpu.parse().unwrap(),
                        memory: Quantity::zero(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn round_robin_cycles_in_order() {
        let lb = RoundRobin::new(FakeUpstreams::new(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]));
        let expected = ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.1"];
        for want in expected {
            assert_eq!(lb.get_backend().unwrap(), want);
        }
    }

    #[test]
    fn round_robin_tracks_a_shrinking_upstream_set() {
        let lb = RoundRobin::new(FakeUpstreams::new(&["10.0.0.1"]));
        assert_eq!(lb.get_backend().unwrap(), "10.0.0.1");
        assert_eq!(lb.get_backend().unwrap(), "10.0.0.1");
    }

    #[test]
    fn random_stays_in_bounds_and_covers_all() {
        let lb = Random::new(FakeUpstreams::new(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]));
        let mut seen = HashMap::new();
        for _ in 0..1000 {
            *seen.entry(lb.get_backend().unwrap()).or_insert(0usize) += 1;
        }
        assert_eq!(seen.len(), 3, "all backends selected: {seen:?}");
    }

    #[test]
    fn weighted_round_robin_matches_its_weights() {
        let lb = WeightedRoundRobin::new(FakeUpstreams::new(&[
            "10.0.0.1", "10.0.0.2", "10.0.0.3",
        ]));

        // Weights [1, 1, 3]: every super-round of five picks holds one of
        // each of the first two backends and three of the third.
        let picks: Vec<String> = (0..1000).map(|_| lb.get_backend().unwrap()).collect();
        for window in picks.chunks(5) {
            let count = |ip: &str| window.iter().filter(|got| *got == ip).count();
            assert_eq!(count("10.0.0.1"), 1, "super-round {window:?}");
            assert_eq!(count("10.0.0.2"), 1, "super-round {window:?}");
            assert_eq!(count("10.0.0.3"), 3, "super-round {window:?}");
        }

        let total = |ip: &str| picks.iter().filter(|got| *got == ip).count();
        assert_eq!(total("10.0.0.1"), 200);
        assert_eq!(total("10.0.0.2"), 200);
        assert_eq!(total("10.0.0.3"), 600);
    }

    #[test]
    fn weighted_round_robin_cycles_weights_past_the_pattern() {
        let lb = WeightedRoundRobin::new(FakeUpstreams::new(&[
            "10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4",
        ]));
        // Pattern cycles to [1, 1, 3, 1]: the fourth backend stays reachable.
        let picks: Vec<String> = (0..600).map(|_| lb.get_backend().unwrap()).collect();
        assert!(picks.iter().any(|ip| ip == "10.0.0.4"));
        let total = |ip: &str| picks.iter().filter(|got| *got == ip).count();
        assert_eq!(total("10.0.0.3"), 3 * total("10.0.0.1"));
    }

    #[test]
    fn least_cpu_picks_the_minimum() {
        let (writer, reader) = pair();
        writer.replace(cpu_snapshot(&[
            ("10.0.0.1", "1"),
            ("10.0.0.2", "2"),
            ("10.0.0.3", "3"),
        ]));
        let lb = LeastCpu::new(
            FakeUpstreams::new(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]),
            reader,
            None,
        );
        assert_eq!(lb.get_backend().unwrap(), "10.0.0.1");

        writer.replace(cpu_snapshot(&[
            ("10.0.0.1", "1"),
            ("10.0.0.2", "0"),
            ("10.0.0.3", "3"),
        ]));
        assert_eq!(lb.get_backend().unwrap(), "10.0.0.2");
    }

    #[test]
    fn least_cpu_separates_near_equal_samples() {
        let (writer, reader) = pair();
        writer.replace(cpu_snapshot(&[
            ("10.0.0.1", "0.000488961"),
            ("10.0.0.2", "0.000480011"),
            ("10.0.0.3", "0.000525077"),
        ]));
        let lb = LeastCpu::new(
            FakeUpstreams::new(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]),
            reader,
            None,
        );
        assert_eq!(lb.get_backend().unwrap(), "10.0.0.2");
    }

    #[test]
    fn least_cpu_defaults_missing_samples_to_zero() {
        let (writer, reader) = pair();
        writer.replace(cpu_snapshot(&[("10.0.0.1", "1"), ("10.0.0.2", "2")]));
        let lb = LeastCpu::new(
            FakeUpstreams::new(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]),
            reader,
            None,
        );
        // 10.0.0.3 has no sample yet and reads as zero.
        assert_eq!(lb.get_backend().unwrap(), "10.0.0.3");
    }

    #[test]
    fn least_mem_compares_memory() {
        let (writer, reader) = pair();
        writer.replace(
            [
                ("10.0.0.1", "64Mi", "100m"),
                ("10.0.0.2", "32Mi", "900m"),
            ]
            .iter()
            .map(|(ip, mem, cpu)| {
                (
                    ip.to_string(),
                    PodUsage {
                        cpu: cpu.parse().unwrap(),
                        memory: mem.parse().unwrap(),
                    },
                )
            })
            .collect(),
        );
        let lb = LeastMem::new(
            FakeUpstreams::new(&["10.0.0.1", "10.0.0.2"]),
            reader,
            None,
        );
        assert_eq!(lb.get_backend().unwrap(), "10.0.0.2");
    }

    #[test]
    fn power_of_two_always_picks_a_sole_backend() {
        let (writer, reader) = pair();
        writer.replace(cpu_snapshot(&[("10.0.0.1", "5")]));
        let lb = PowerOfTwoCpu::new(FakeUpstreams::new(&["10.0.0.1"]), reader, None);
        for _ in 0..10 {
            assert_eq!(lb.get_backend().unwrap(), "10.0.0.1");
        }
    }

    #[test]
    fn power_of_two_stays_in_bounds() {
        let (writer, reader) = pair();
        writer.replace(cpu_snapshot(&[("10.0.0.1", "1"), ("10.0.0.2", "2")]));
        let upstreams = ["10.0.0.1", "10.0.0.2", "10.0.0.3"];
        let lb = PowerOfTwoCpu::new(FakeUpstreams::new(&upstreams), reader, None);
        for _ in 0..100 {
            let got = lb.get_backend().unwrap();
            assert!(upstreams.contains(&got.as_str()));
        }
    }

    #[test]
    fn fetch_errors_propagate() {
        let lb = RoundRobin::new(FailingUpstreams);
        assert!(matches!(
            lb.get_backend(),
            Err(FetchError::NoSubsets { .. })
        ));
    }

    #[test]
    fn empty_upstreams_are_an_error() {
        let lb = Random::new(FakeUpstreams::new(&[]));
        assert!(matches!(lb.get_backend(), Err(FetchError::Empty)));
    }

    #[test]
    fn policy_tags_parse_case_sensitively() {
        assert_eq!("RoundRobin".parse::<Policy>().unwrap(), Policy::RoundRobin);
        assert_eq!("Random".parse::<Policy>().unwrap(), Policy::Random);
        assert_eq!(
            "WeightedRR".parse::<Policy>().unwrap(),
            Policy::WeightedRoundRobin
        );
        assert_eq!("LeastCPU".parse::<Policy>().unwrap(), Policy::LeastCpu);
        assert_eq!("LeastMem".parse::<Policy>().unwrap(), Policy::LeastMem);
        assert_eq!("LessCPU".parse::<Policy>().unwrap(), Policy::PowerOfTwoCpu);
        assert!("roundrobin".parse::<Policy>().is_err());
        assert!("LeastDisk".parse::<Policy>().is_err());
    }
}
