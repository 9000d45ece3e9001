#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Breakpoints(Vec<Breakpoint>);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Breakpoint {
    /// Instruction index.
    pub address: u16,
    pub enabled: bool,
    /// Stored and reported, but never evaluated.
    pub condition: Option<String>,
}

impl Breakpoint {
    pub fn new(address: u16) -> Self {
        Self {
            address,
            enabled: true,
            condition: None,
        }
    }
}

impl Breakpoints {
    pub fn get(&self, address: u16) -> Option<&Breakpoint> {
        self.0.iter().find(|breakpoint| breakpoint.address == address)
    }

    /// Whether execution should pause before `address`.
    pub fn is_active(&self, address: u16) -> bool {
        self.0
            .iter()
            .any(|breakpoint| breakpoint.address == address && breakpoint.enabled)
    }

    /// Adds a breakpoint, replacing any existing one at the same address.
    pub fn insert(&mut self, breakpoint: Breakpoint) {
        self.remove(breakpoint.address);
        let index = self
            .0
            .partition_point(|existing| existing.address < breakpoint.address);
        self.0.insert(index, breakpoint);
    }

    /// Removes every breakpoint with given address
    ///
    /// Returns whether any breakpoint was found with given address
    pub fn remove(&mut self, address: u16) -> bool {
        let initial_len = self.0.len();
        self.0.retain(|breakpoint| breakpoint.address != address);
        initial_len != self.0.len()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.0.iter()
    }
}

impl From<Vec<Breakpoint>> for Breakpoints {
    fn from(vec: Vec<Breakpoint>) -> Self {
        let mut breakpoints = Self::default();
        for breakpoint in vec {
            breakpoints.insert(breakpoint);
        }
        breakpoints
    }
}

impl<'a> IntoIterator for &'a Breakpoints {
    type Item = &'a Breakpoint;
    type IntoIter = std::slice::Iter<'a, Breakpoint>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_and_unique() {
        let breakpoints = Breakpoints::from(vec![
            Breakpoint::new(7),
            Breakpoint::new(2),
            Breakpoint {
                enabled: false,
                ..Breakpoint::new(7)
            },
        ]);
        let addresses: Vec<_> = breakpoints.iter().map(|b| b.address).collect();
        assert_eq!(addresses, vec![2, 7]);
        assert!(breakpoints.is_active(2));
        assert!(!breakpoints.is_active(7));
        assert!(breakpoints.get(7).is_some());
    }
}
