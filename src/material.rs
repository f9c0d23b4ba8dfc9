//! Surface materials and per-pair contact parameters.

use crate::fph;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

static MATERIAL_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

pub type MaterialId = u32;

/// A surface material. Friction and restitution are optional; unset values
/// defer to the contact material resolved for a body pair.
#[derive(Clone, Debug)]
pub struct Material {
    pub id: MaterialId,
    pub name: String,
    pub friction: Option<fph>,
    pub restitution: Option<fph>,
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: MATERIAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            friction: None,
            restitution: None,
        }
    }

    pub fn with_friction(mut self, friction: fph) -> Self {
        self.friction = Some(friction);
        self
    }

    pub fn with_restitution(mut self, restitution: fph) -> Self {
        self.restitution = Some(restitution);
        self
    }
}

/// Contact parameters for a pair of materials.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
#[derive(Clone, Copy, Debug)]
pub struct ContactMaterial {
    pub friction: fph,
    pub restitution: fph,
    pub contact_equation_stiffness: fph,
    pub contact_equation_relaxation: fph,
    pub friction_equation_stiffness: fph,
    pub friction_equation_relaxation: fph,
}

impl Default for ContactMaterial {
    fn default() -> Self {
        Self {
            friction: 0.3,
            restitution: 0.3,
            contact_equation_stiffness: 1e7,
            contact_equation_relaxation: 3.0,
            friction_equation_stiffness: 1e7,
            friction_equation_relaxation: 3.0,
        }
    }
}

/// Pairwise contact-material table keyed by unordered material id pairs.
#[derive(Clone, Debug, Default)]
pub struct ContactMaterialTable {
    table: HashMap<(MaterialId, MaterialId), ContactMaterial>,
}

impl ContactMaterialTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, a: MaterialId, b: MaterialId, contact_material: ContactMaterial) {
        self.table.insert(Self::key(a, b), contact_material);
    }

    pub fn get(&self, a: MaterialId, b: MaterialId) -> Option<&ContactMaterial> {
        self.table.get(&Self::key(a, b))
    }

    pub fn remove(&mut self, a: MaterialId, b: MaterialId) {
        self.table.remove(&Self::key(a, b));
    }

    fn key(a: MaterialId, b: MaterialId) -> (MaterialId, MaterialId) {
        if a <= b { (a, b) } else { (b, a) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn should_look_up_contact_material_regardless_of_order() {
        let rubber = Material::new("rubber");
        let ice = Material::new("ice");
        let mut table = ContactMaterialTable::new();
        table.insert(
            rubber.id,
            ice.id,
            ContactMaterial {
                friction: 0.05,
                ..ContactMaterial::default()
            },
        );

        assert_abs_diff_eq!(table.get(ice.id, rubber.id).unwrap().friction, 0.05);
        assert_abs_diff_eq!(table.get(rubber.id, ice.id).unwrap().friction, 0.05);
    }

    #[test]
    fn should_assign_distinct_material_ids() {
        let a = Material::new("a");
        let b = Material::new("b");
        assert_ne!(a.id, b.id);
    }
}
