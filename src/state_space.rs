use std::{collections::HashMap, fmt::Debug, hash::Hash};

use crate::metropolis::ConfigError;

/// Position of a state inside its [`StateSpace`].
pub type StateIdx = usize;

/// A finite, ordered set of distinct state labels.
///
/// The order of the labels fixes the index of every state, and all tables,
/// traces and histograms are indexed the same way.
#[derive(Debug, Clone)]
pub struct StateSpace<S> {
    labels: Box<[S]>,
    index: HashMap<S, StateIdx>,
}

impl<S> StateSpace<S>
where
    S: Clone + Eq + Hash + Debug,
{
    pub fn new(labels: impl IntoIterator<Item = S>) -> Result<Self, ConfigError> {
        let labels: Box<[S]> = labels.into_iter().collect();
        if labels.len() < 2 {
            return Err(ConfigError::TooFewStates(labels.len()));
        }
        let mut index = HashMap::with_capacity(labels.len());
        for (idx, label) in labels.iter().enumerate() {
            if index.insert(label.clone(), idx).is_some() {
                return Err(ConfigError::DuplicateState(format!("{:?}", label)));
            }
        }
        Ok(Self { labels, index })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false, a state space has at least two states.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, idx: StateIdx) -> &S {
        &self.labels[idx]
    }

    pub fn labels(&self) -> &[S] {
        &self.labels
    }

    pub fn index_of(&self, label: &S) -> Option<StateIdx> {
        self.index.get(label).copied()
    }

    /// Look up the index of the initial state of a chain.
    pub fn initial(&self, label: &S) -> Result<StateIdx, ConfigError> {
        self.index_of(label)
            .ok_or_else(|| ConfigError::UnknownInitialState(format!("{:?}", label)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (StateIdx, &S)> + '_ {
        self.labels.iter().enumerate()
    }

    pub(crate) fn describe(&self, idx: StateIdx) -> String {
        format!("{:?}", self.labels[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn indices_follow_label_order() {
        let space = StateSpace::new(["Texas", "Montana", "California"]).unwrap();
        assert_eq!(space.len(), 3);
        assert_eq!(space.index_of(&"Montana"), Some(1));
        assert_eq!(space.label(2), &"California");
        assert_eq!(space.index_of(&"Virginia"), None);
        let order: Vec<_> = space.iter().map(|(idx, _)| idx).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn rejects_single_state() {
        assert_eq!(
            StateSpace::new(["Texas"]).unwrap_err(),
            ConfigError::TooFewStates(1)
        );
        assert_eq!(
            StateSpace::<u8>::new([]).unwrap_err(),
            ConfigError::TooFewStates(0)
        );
    }

    #[test]
    fn rejects_duplicates() {
        let err = StateSpace::new(["Texas", "Montana", "Texas"]).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateState("\"Texas\"".into()));
    }

    #[test]
    fn unknown_initial_state() {
        let space = StateSpace::new([1u8, 2]).unwrap();
        assert_eq!(space.initial(&2), Ok(1));
        assert_eq!(
            space.initial(&3),
            Err(ConfigError::UnknownInitialState("3".into()))
        );
    }
}
