//! Typed watch events and the predicates that turn them into reconcile
//! triggers.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use futures_util::{Stream, StreamExt, stream};
use kube::Resource;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;

use crate::crd::monitored_service::MonitoredService;

#[derive(Clone, Debug)]
pub enum ChangeEvent<K> {
    Create(K),
    Update { old: K, new: K },
    Delete(K),
}

impl<K> ChangeEvent<K> {
    /// Current version of the object, `None` once deleted.
    pub fn into_current(self) -> Option<K> {
        match self {
            ChangeEvent::Create(k) | ChangeEvent::Update { new: k, .. } => Some(k),
            ChangeEvent::Delete(_) => None,
        }
    }
}

pub trait Predicate<K>: Send + Sync + 'static {
    fn accepts(&self, event: &ChangeEvent<K>) -> bool;
}

/// Monitor loop trigger: new resources, and updates that point at a
/// different configuration source.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConfigSourceChanged;

impl Predicate<MonitoredService> for ConfigSourceChanged {
    fn accepts(&self, event: &ChangeEvent<MonitoredService>) -> bool {
        match event {
            ChangeEvent::Create(_) => true,
            ChangeEvent::Update { old, new } => {
                old.spec.config_source != new.spec.config_source
            }
            ChangeEvent::Delete(_) => false,
        }
    }
}

/// Enforcement loop trigger: updates to the desired replica count.
#[derive(Clone, Copy, Debug, Default)]
pub struct SizeChanged;

impl Predicate<MonitoredService> for SizeChanged {
    fn accepts(&self, event: &ChangeEvent<MonitoredService>) -> bool {
        match event {
            ChangeEvent::Update { old, new } => old.spec.size != new.spec.size,
            ChangeEvent::Create(_) | ChangeEvent::Delete(_) => false,
        }
    }
}

/// Remembers the last seen version of every object so raw watcher events can
/// be paired into old/new updates. A re-list that no longer contains an
/// object yields a delete for it.
pub struct ChangeTracker<K>
where
    K: Resource,
    K::DynamicType: Hash + Eq,
{
    seen: HashMap<ObjectRef<K>, K>,
    relisted: Option<HashSet<ObjectRef<K>>>,
}

impl<K> Default for ChangeTracker<K>
where
    K: Resource,
    K::DynamicType: Hash + Eq,
{
    fn default() -> Self {
        Self {
            seen: HashMap::new(),
            relisted: None,
        }
    }
}

impl<K> ChangeTracker<K>
where
    K: Resource<DynamicType = ()> + Clone,
{
    pub fn observe(&mut self, event: watcher::Event<K>) -> Vec<ChangeEvent<K>> {
        match event {
            watcher::Event::Apply(obj) => vec![self.apply(obj)],
            watcher::Event::InitApply(obj) => {
                if let Some(live) = self.relisted.as_mut() {
                    live.insert(ObjectRef::from_obj(&obj));
                }
                vec![self.apply(obj)]
            }
            watcher::Event::Delete(obj) => {
                self.seen.remove(&ObjectRef::from_obj(&obj));
                vec![ChangeEvent::Delete(obj)]
            }
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                vec![]
            }
            watcher::Event::InitDone => {
                let Some(live) = self.relisted.take() else {
                    return vec![];
                };
                let gone: Vec<ObjectRef<K>> = self
                    .seen
                    .keys()
                    .filter(|k| !live.contains(*k))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|k| self.seen.remove(&k))
                    .map(ChangeEvent::Delete)
                    .collect()
            }
        }
    }

    fn apply(&mut self, obj: K) -> ChangeEvent<K> {
        match self.seen.insert(ObjectRef::from_obj(&obj), obj.clone()) {
            Some(old) => ChangeEvent::Update { old, new: obj },
            None => ChangeEvent::Create(obj),
        }
    }
}

/// Filter a watcher event stream down to the objects whose change passes
/// `predicate`. Watch errors are passed through for the controller's backoff.
pub fn filtered_triggers<S, K, P>(
    events: S,
    predicate: P,
) -> impl Stream<Item = Result<K, watcher::Error>> + Send + 'static
where
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send + 'static,
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
    P: Predicate<K>,
{
    let mut tracker = ChangeTracker::<K>::default();
    events.flat_map(move |res| {
        let out: Vec<Result<K, watcher::Error>> = match res {
            Ok(ev) => tracker
                .observe(ev)
                .into_iter()
                .filter(|c| predicate.accepts(c))
                .filter_map(ChangeEvent::into_current)
                .map(Ok)
                .collect(),
            Err(e) => vec![Err(e)],
        };
        stream::iter(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::monitored_service::MonitoredServiceSpec;
    use kube::ResourceExt;

    fn svc(name: &str, size: i32, source: &str) -> MonitoredService {
        let mut s = MonitoredService::new(
            name,
            MonitoredServiceSpec {
                image: "img".into(),
                size,
                config_source: source.into(),
                port: None,
            },
        );
        s.metadata.namespace = Some("ns".into());
        s
    }

    #[test]
    fn config_source_predicate() {
        let p = ConfigSourceChanged;
        assert!(p.accepts(&ChangeEvent::Create(svc("a", 1, "u1"))));
        assert!(p.accepts(&ChangeEvent::Update {
            old: svc("a", 1, "u1"),
            new: svc("a", 1, "u2"),
        }));
        assert!(!p.accepts(&ChangeEvent::Update {
            old: svc("a", 1, "u1"),
            new: svc("a", 5, "u1"),
        }));
        assert!(!p.accepts(&ChangeEvent::Delete(svc("a", 1, "u1"))));
    }

    #[test]
    fn size_predicate() {
        let p = SizeChanged;
        assert!(!p.accepts(&ChangeEvent::Create(svc("a", 1, "u1"))));
        assert!(p.accepts(&ChangeEvent::Update {
            old: svc("a", 1, "u1"),
            new: svc("a", 3, "u1"),
        }));
        assert!(!p.accepts(&ChangeEvent::Update {
            old: svc("a", 1, "u1"),
            new: svc("a", 1, "u2"),
        }));
    }

    #[test]
    fn tracker_pairs_updates_and_detects_relist_deletes() {
        let mut t = ChangeTracker::<MonitoredService>::default();
        let ev = t.observe(watcher::Event::Apply(svc("a", 1, "u1")));
        assert!(matches!(ev.as_slice(), [ChangeEvent::Create(_)]));

        let ev = t.observe(watcher::Event::Apply(svc("a", 2, "u1")));
        match ev.as_slice() {
            [ChangeEvent::Update { old, new }] => {
                assert_eq!(old.spec.size, 1);
                assert_eq!(new.spec.size, 2);
            }
            other => panic!("unexpected {other:?}"),
        }

        t.observe(watcher::Event::Apply(svc("b", 1, "u1")));
        assert!(t.observe(watcher::Event::Init).is_empty());
        t.observe(watcher::Event::InitApply(svc("a", 2, "u1")));
        let ev = t.observe(watcher::Event::InitDone);
        match ev.as_slice() {
            [ChangeEvent::Delete(gone)] => assert_eq!(gone.name_any(), "b"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn filtered_stream_only_yields_accepted_changes() {
        let evs: Vec<Result<watcher::Event<MonitoredService>, watcher::Error>> = vec![
            Ok(watcher::Event::Apply(svc("a", 1, "u1"))),
            Ok(watcher::Event::Apply(svc("a", 1, "u1"))),
            Ok(watcher::Event::Apply(svc("a", 4, "u1"))),
            Ok(watcher::Event::Apply(svc("a", 4, "u2"))),
            Ok(watcher::Event::Delete(svc("a", 4, "u2"))),
        ];
        let out: Vec<_> = filtered_triggers(stream::iter(evs), SizeChanged).collect().await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap().spec.size, 4);
    }
}
