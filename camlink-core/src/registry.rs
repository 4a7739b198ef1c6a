//! Per-facing storage.
//!
//! Exactly two slots, one per [`Facing`]. Owned by whoever runs the
//! devices; never global.

use crate::device::Facing;

#[derive(Debug)]
pub struct DeviceRegistry<T> {
    back: Option<T>,
    front: Option<T>,
}

impl<T> DeviceRegistry<T> {
    pub fn new() -> Self {
        Self {
            back: None,
            front: None,
        }
    }

    fn slot(&mut self, facing: Facing) -> &mut Option<T> {
        match facing {
            Facing::Back => &mut self.back,
            Facing::Front => &mut self.front,
        }
    }

    /// Store `value`, returning whatever was there before.
    pub fn insert(&mut self, facing: Facing, value: T) -> Option<T> {
        self.slot(facing).replace(value)
    }

    pub fn get(&self, facing: Facing) -> Option<&T> {
        match facing {
            Facing::Back => self.back.as_ref(),
            Facing::Front => self.front.as_ref(),
        }
    }

    pub fn get_mut(&mut self, facing: Facing) -> Option<&mut T> {
        self.slot(facing).as_mut()
    }

    pub fn remove(&mut self, facing: Facing) -> Option<T> {
        self.slot(facing).take()
    }

    pub fn contains(&self, facing: Facing) -> bool {
        self.get(facing).is_some()
    }

    pub fn len(&self) -> usize {
        self.back.is_some() as usize + self.front.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Occupied slots, rear first.
    pub fn iter(&self) -> impl Iterator<Item = (Facing, &T)> {
        Facing::ALL
            .into_iter()
            .filter_map(move |f| self.get(f).map(|v| (f, v)))
    }

    /// Empty both slots, rear first.
    pub fn drain(&mut self) -> Vec<(Facing, T)> {
        Facing::ALL
            .into_iter()
            .filter_map(|f| self.remove(f).map(|v| (f, v)))
            .collect()
    }
}

impl<T> Default for DeviceRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_independent() {
        let mut reg = DeviceRegistry::new();
        assert!(reg.is_empty());
        assert_eq!(reg.insert(Facing::Front, 1), None);
        assert_eq!(reg.insert(Facing::Front, 2), Some(1));
        reg.insert(Facing::Back, 7);

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get(Facing::Front), Some(&2));
        *reg.get_mut(Facing::Back).unwrap() += 1;

        let all: Vec<_> = reg.iter().collect();
        assert_eq!(all, vec![(Facing::Back, &8), (Facing::Front, &2)]);

        assert_eq!(reg.remove(Facing::Back), Some(8));
        assert!(!reg.contains(Facing::Back));
        assert_eq!(reg.drain(), vec![(Facing::Front, 2)]);
        assert!(reg.is_empty());
    }
}
