//! The N-dimensional molecular environment.
//!
//! Two parallel flat arrays over the same row-major index space: molecule
//! ints and owner ids. The engine owns the environment exclusively; every
//! snapshot that leaves the engine is a deep copy.

use evochora_core::{Coord, Molecule};
use thiserror::Error;

/// Coordinate errors on bounded worlds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvironmentError {
    /// The coordinate lies outside a bounded world's shape.
    #[error("coordinate {coord:?} out of bounds for shape {shape:?}")]
    OutOfBounds {
        /// Offending coordinate.
        coord: Coord,
        /// World extents.
        shape: Vec<i32>,
    },
    /// The coordinate has the wrong number of axes.
    #[error("coordinate {coord:?} does not match world dimensionality {dims}")]
    DimensionMismatch {
        /// Offending coordinate.
        coord: Coord,
        /// Expected axis count.
        dims: usize,
    },
}

/// The molecule grid plus its parallel owner grid.
pub struct Environment {
    shape: Vec<i32>,
    toroidal: bool,
    molecules: Vec<i32>,
    owners: Vec<u64>,
}

impl Environment {
    /// Create an empty world of the given shape.
    pub fn new(shape: &[u32], toroidal: bool) -> Environment {
        debug_assert!(!shape.is_empty() && shape.iter().all(|&d| d > 0));
        let volume = shape.iter().map(|&d| d as usize).product();
        Environment {
            shape: shape.iter().map(|&d| d as i32).collect(),
            toroidal,
            molecules: vec![0; volume],
            owners: vec![0; volume],
        }
    }

    /// World extents per axis.
    pub fn shape(&self) -> &[i32] {
        &self.shape
    }

    /// Number of axes.
    pub fn dims(&self) -> usize {
        self.shape.len()
    }

    /// Does this world wrap around its edges?
    pub fn is_toroidal(&self) -> bool {
        self.toroidal
    }

    /// Total cell count.
    pub fn volume(&self) -> usize {
        self.molecules.len()
    }

    /// Bring a coordinate into range: per-axis wrap on a toroidal world,
    /// bounds check on a bounded one.
    pub fn normalize(&self, coord: &[i32]) -> Result<Coord, EnvironmentError> {
        if coord.len() != self.shape.len() {
            return Err(EnvironmentError::DimensionMismatch {
                coord: coord.to_vec(),
                dims: self.shape.len(),
            });
        }
        if self.toroidal {
            Ok(coord
                .iter()
                .zip(self.shape.iter())
                .map(|(&c, &d)| c.rem_euclid(d))
                .collect())
        } else if coord.iter().zip(self.shape.iter()).all(|(&c, &d)| c >= 0 && c < d) {
            Ok(coord.to_vec())
        } else {
            Err(EnvironmentError::OutOfBounds {
                coord: coord.to_vec(),
                shape: self.shape.clone(),
            })
        }
    }

    /// `start + steps * dv`, normalized.
    pub fn offset(
        &self,
        start: &[i32],
        dv: &[i32],
        steps: i32,
    ) -> Result<Coord, EnvironmentError> {
        let raw: Coord = start
            .iter()
            .zip(dv.iter())
            .map(|(&c, &d)| c + steps * d)
            .collect();
        self.normalize(&raw)
    }

    /// The molecule at a coordinate.
    pub fn get(&self, coord: &[i32]) -> Result<Molecule, EnvironmentError> {
        let index = self.index(&self.normalize(coord)?);
        Ok(Molecule::from_raw(self.molecules[index]))
    }

    /// The owner id at a coordinate, 0 when unowned.
    pub fn owner(&self, coord: &[i32]) -> Result<u64, EnvironmentError> {
        let index = self.index(&self.normalize(coord)?);
        Ok(self.owners[index])
    }

    /// Write a molecule and its owner at a coordinate.
    pub fn set(
        &mut self,
        coord: &[i32],
        molecule: Molecule,
        owner: u64,
    ) -> Result<(), EnvironmentError> {
        let index = self.index(&self.normalize(coord)?);
        self.molecules[index] = molecule.raw();
        self.owners[index] = owner;
        Ok(())
    }

    /// Visit every non-empty cell in index order.
    pub fn for_each_non_empty<F>(&self, mut visit: F)
    where
        F: FnMut(Coord, Molecule, u64),
    {
        for (index, &raw) in self.molecules.iter().enumerate() {
            if raw != 0 {
                visit(
                    self.coord_of(index),
                    Molecule::from_raw(raw),
                    self.owners[index],
                );
            }
        }
    }

    fn index(&self, normalized: &[i32]) -> usize {
        let mut index = 0usize;
        for (&c, &d) in normalized.iter().zip(self.shape.iter()) {
            index = index * d as usize + c as usize;
        }
        index
    }

    fn coord_of(&self, mut index: usize) -> Coord {
        let mut coord = vec![0i32; self.shape.len()];
        for axis in (0..self.shape.len()).rev() {
            let d = self.shape[axis] as usize;
            coord[axis] = (index % d) as i32;
            index /= d;
        }
        coord
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evochora_core::MoleculeType;

    #[test]
    fn toroidal_wrap_per_axis() {
        let env = Environment::new(&[5, 3], true);
        assert_eq!(env.normalize(&[-1, 3]).unwrap(), vec![4, 0]);
        assert_eq!(env.normalize(&[7, -4]).unwrap(), vec![2, 2]);
        assert_eq!(env.offset(&[4, 0], &[1, 0], 1).unwrap(), vec![0, 0]);
    }

    #[test]
    fn bounded_world_rejects_out_of_range() {
        let env = Environment::new(&[5, 3], false);
        assert!(env.normalize(&[0, 0]).is_ok());
        assert!(env.normalize(&[4, 2]).is_ok());
        assert!(matches!(
            env.normalize(&[5, 0]),
            Err(EnvironmentError::OutOfBounds { .. })
        ));
        assert!(matches!(
            env.offset(&[4, 0], &[1, 0], 1),
            Err(EnvironmentError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let env = Environment::new(&[5, 3], true);
        assert!(matches!(
            env.normalize(&[1, 2, 3]),
            Err(EnvironmentError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn get_set_round_trip_with_owner() {
        let mut env = Environment::new(&[4, 4], true);
        let molecule = Molecule::new(MoleculeType::Data, 7);
        env.set(&[2, 2], molecule, 5).unwrap();
        assert_eq!(env.get(&[2, 2]).unwrap(), molecule);
        assert_eq!(env.owner(&[2, 2]).unwrap(), 5);
        // wrapped access reads the same cell
        assert_eq!(env.get(&[-2, 6]).unwrap(), molecule);
    }

    #[test]
    fn non_empty_iteration_is_index_ordered() {
        let mut env = Environment::new(&[3, 3], true);
        env.set(&[2, 1], Molecule::new(MoleculeType::Data, 1), 0).unwrap();
        env.set(&[0, 2], Molecule::new(MoleculeType::Data, 2), 0).unwrap();
        let mut seen = Vec::new();
        env.for_each_non_empty(|coord, molecule, _| seen.push((coord, molecule.value())));
        assert_eq!(seen, vec![(vec![0, 2], 2), (vec![2, 1], 1)]);
    }

    #[test]
    fn one_dimensional_world_works() {
        let mut env = Environment::new(&[10], true);
        env.set(&[9], Molecule::new(MoleculeType::Energy, 3), 0).unwrap();
        assert_eq!(env.offset(&[9], &[1], 1).unwrap(), vec![0]);
        assert_eq!(env.get(&[-1]).unwrap().value(), 3);
    }
}
