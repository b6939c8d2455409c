//! Fixture table and dependency resolution

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::common::{Error, Result};

use super::{CompositorSession, FixtureScope, FixtureSpec};

/// Name → spec table, checked once when the run starts
#[derive(Debug, Default)]
pub struct FixtureRegistry {
    /// Registration order doubles as the tie-break for creation order
    specs: Vec<FixtureSpec>,
    index: HashMap<String, usize>,
}

impl FixtureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a spec; names are unique
    pub fn register(&mut self, spec: FixtureSpec) -> Result<()> {
        if self.index.contains_key(&spec.name) {
            return Err(Error::DuplicateFixture(spec.name));
        }
        self.index.insert(spec.name.clone(), self.specs.len());
        self.specs.push(spec);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    /// Check the whole table: every dependency exists and the graph is acyclic
    pub fn validate(&self) -> Result<()> {
        for spec in &self.specs {
            for dep in &spec.deps {
                if !self.index.contains_key(dep) {
                    return Err(Error::UnknownFixture(format!(
                        "{} (dependency of {})",
                        dep, spec.name
                    )));
                }
            }
        }
        let all: Vec<usize> = (0..self.specs.len()).collect();
        self.order(&all).map(|_| ())
    }

    fn lookup(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownFixture(name.to_string()))
    }

    /// Creation order for `requested` and everything it depends on
    ///
    /// Every requested name is checked before any ordering happens, so an
    /// unknown name fails without side effects.
    pub fn plan(&self, requested: &[&str]) -> Result<Vec<&str>> {
        let roots = requested
            .iter()
            .map(|name| self.lookup(name))
            .collect::<Result<Vec<_>>>()?;

        // Induced subgraph: the requested specs plus transitive dependencies
        let mut induced = BTreeSet::new();
        let mut stack = roots;
        while let Some(idx) = stack.pop() {
            if induced.insert(idx) {
                for dep in &self.specs[idx].deps {
                    stack.push(self.lookup(dep)?);
                }
            }
        }

        let members: Vec<usize> = induced.into_iter().collect();
        let order = self.order(&members)?;
        Ok(order
            .into_iter()
            .map(|idx| self.specs[idx].name.as_str())
            .collect())
    }

    /// Kahn's algorithm over `members`, lowest registration index first
    fn order(&self, members: &[usize]) -> Result<Vec<usize>> {
        let mut indegree: HashMap<usize, usize> = members.iter().map(|&m| (m, 0)).collect();
        let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();

        for &member in members {
            for dep in &self.specs[member].deps {
                let dep = self.lookup(dep)?;
                if indegree.contains_key(&dep) {
                    *indegree.entry(member).or_default() += 1;
                    dependents.entry(dep).or_default().push(member);
                }
            }
        }

        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&m, _)| m)
            .collect();
        let mut order = Vec::with_capacity(members.len());

        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &dependent in dependents.get(&next).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(&dependent) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() < members.len() {
            let stuck: BTreeSet<usize> = members
                .iter()
                .copied()
                .filter(|m| !order.contains(m))
                .collect();
            return Err(Error::FixtureCycle(self.cycle_path(&stuck)));
        }
        Ok(order)
    }

    /// Walk dependencies inside `stuck` until a name repeats
    fn cycle_path(&self, stuck: &BTreeSet<usize>) -> Vec<String> {
        let Some(&start) = stuck.first() else {
            return Vec::new();
        };
        let mut path = vec![start];
        let mut current = start;
        loop {
            let next = self.specs[current]
                .deps
                .iter()
                .filter_map(|d| self.index.get(d).copied())
                .find(|d| stuck.contains(d));
            let Some(next) = next else { break };

            if let Some(pos) = path.iter().position(|&p| p == next) {
                path.drain(..pos);
                path.push(next);
                break;
            }
            path.push(next);
            current = next;
        }
        path.into_iter()
            .map(|idx| self.specs[idx].name.clone())
            .collect()
    }

    /// Create the fixtures `requested` needs, dependencies first
    ///
    /// If any factory fails, the fixtures created so far are torn down in
    /// reverse order before the error is returned.
    pub async fn resolve(
        &self,
        requested: &[&str],
        session: Arc<CompositorSession>,
    ) -> Result<FixtureScope> {
        let plan = self.plan(requested)?;
        let mut scope = FixtureScope::new(session);

        for name in plan {
            let spec = &self.specs[self.lookup(name)?];
            match spec.factory.create(&mut scope).await {
                Ok(fixture) => scope.push(&spec.name, fixture, Arc::clone(&spec.factory)),
                Err(e) => {
                    tracing::debug!("Fixture {} failed: {}", spec.name, e);
                    scope.teardown().await;
                    return Err(e);
                }
            }
        }
        Ok(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::Config;
    use crate::fixtures::{Fixture, FixtureFactory};
    use async_trait::async_trait;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: &'static str,
        journal: Journal,
        fail: bool,
    }

    #[async_trait]
    impl FixtureFactory for Recording {
        async fn create(&self, _scope: &mut FixtureScope) -> Result<Fixture> {
            if self.fail {
                return Err(Error::connection_failed(
                    self.name,
                    std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                ));
            }
            self.journal.lock().unwrap().push(format!("create {}", self.name));
            Ok(Fixture::Value(Box::new(self.name)))
        }

        async fn teardown(&self, _fixture: Fixture, _scope: &mut FixtureScope) -> Result<()> {
            self.journal.lock().unwrap().push(format!("teardown {}", self.name));
            Ok(())
        }
    }

    fn spec(name: &'static str, deps: &[&str], journal: &Journal) -> FixtureSpec {
        spec_failing(name, deps, journal, false)
    }

    fn spec_failing(name: &'static str, deps: &[&str], journal: &Journal, fail: bool) -> FixtureSpec {
        let mut spec = FixtureSpec::new(
            name,
            Arc::new(Recording {
                name,
                journal: Arc::clone(journal),
                fail,
            }),
        );
        for dep in deps {
            spec = spec.depends_on(*dep);
        }
        spec
    }

    fn session() -> Arc<CompositorSession> {
        Arc::new(CompositorSession::from_config(&Config::default(), None))
    }

    #[test]
    fn test_duplicate_rejected() {
        let journal = Journal::default();
        let mut registry = FixtureRegistry::new();
        registry.register(spec("client", &[], &journal)).unwrap();
        let err = registry.register(spec("client", &[], &journal)).unwrap_err();
        assert!(matches!(err, Error::DuplicateFixture(_)));
    }

    #[test]
    fn test_plan_orders_dependencies_first() {
        let journal = Journal::default();
        let mut registry = FixtureRegistry::new();
        registry.register(spec("window", &["client"], &journal)).unwrap();
        registry.register(spec("monitor", &[], &journal)).unwrap();
        registry.register(spec("client", &[], &journal)).unwrap();
        registry.validate().unwrap();

        assert_eq!(registry.plan(&["window"]).unwrap(), vec!["client", "window"]);
        // Ties broken by registration order
        assert_eq!(
            registry.plan(&["client", "window", "monitor"]).unwrap(),
            vec!["monitor", "client", "window"]
        );
        assert!(registry.plan(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_cycle_detected() {
        let journal = Journal::default();
        let mut registry = FixtureRegistry::new();
        registry.register(spec("a", &["b"], &journal)).unwrap();
        registry.register(spec("b", &["c"], &journal)).unwrap();
        registry.register(spec("c", &["a"], &journal)).unwrap();
        registry.register(spec("d", &[], &journal)).unwrap();

        match registry.validate().unwrap_err() {
            Error::FixtureCycle(path) => assert_eq!(path, vec!["a", "b", "c", "a"]),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(matches!(
            registry.plan(&["c"]),
            Err(Error::FixtureCycle(_))
        ));
        assert_eq!(registry.plan(&["d"]).unwrap(), vec!["d"]);
    }

    #[test]
    fn test_unknown_dependency_rejected_by_validate() {
        let journal = Journal::default();
        let mut registry = FixtureRegistry::new();
        registry.register(spec("window", &["client"], &journal)).unwrap();
        assert!(matches!(
            registry.validate().unwrap_err(),
            Error::UnknownFixture(_)
        ));
    }

    #[tokio::test]
    async fn test_unknown_name_fails_before_creation() {
        let journal = Journal::default();
        let mut registry = FixtureRegistry::new();
        registry.register(spec("client", &[], &journal)).unwrap();

        let err = registry
            .resolve(&["client", "clipboard"], session())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown fixture clipboard");
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_reverses_creation() {
        let journal = Journal::default();
        let mut registry = FixtureRegistry::new();
        registry.register(spec("client", &[], &journal)).unwrap();
        registry.register(spec("window", &["client"], &journal)).unwrap();

        let mut scope = registry.resolve(&["window"], session()).await.unwrap();
        assert_eq!(scope.names(), vec!["client", "window"]);
        assert_eq!(*scope.value::<&str>("window").unwrap(), "window");
        assert!(scope.value::<u32>("window").is_err());

        scope.teardown().await;
        assert!(scope.is_empty());
        assert_eq!(
            *journal.lock().unwrap(),
            vec![
                "create client",
                "create window",
                "teardown window",
                "teardown client"
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_creation_releases_earlier_fixtures() {
        let journal = Journal::default();
        let mut registry = FixtureRegistry::new();
        registry.register(spec("client", &[], &journal)).unwrap();
        registry.register(spec("window", &["client"], &journal)).unwrap();
        registry
            .register(spec_failing("monitor", &["window"], &journal, true))
            .unwrap();

        let err = registry.resolve(&["monitor"], session()).await.unwrap_err();
        assert_eq!(err.class(), crate::common::ErrorClass::Connection);
        assert_eq!(
            *journal.lock().unwrap(),
            vec![
                "create client",
                "create window",
                "teardown window",
                "teardown client"
            ]
        );
    }
}
