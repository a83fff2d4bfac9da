//! Preheat suppliers
//!
//! [`standard_suppliers`] returns them in dependency order:
//! 1. Defaults
//! 2. Metadata referenced by the payload, one supplier per kind
//! 3. Programs of program stages and category combos of programs
//! 4. Users
//! 5. Stored tracked entities, enrollments, events, relationships
//! 6. Existing relationship keys (needs relationship types)
//! 7. Program owners
//! 8. Enrollments of programs without registration (needs programs)
//! 9. Attribute option combos (needs 1-3)

pub mod metadata;
pub mod tracker;
pub mod user;

use super::PreheatSupplier;
use crate::models::TrackerType;

pub use metadata::{
    category_combo_of_event, referenced_identifiers, CategoryOptionComboSupplier, DefaultsSupplier,
    MetadataSupplier, ProgramDependencySupplier,
};
pub use tracker::{
    referenced_uids, EnrollmentWithoutRegistrationSupplier, ExistingRelationshipSupplier,
    ProgramOwnerSupplier, TrackerObjectSupplier,
};
pub use user::UserSupplier;

pub fn standard_suppliers() -> Vec<Box<dyn PreheatSupplier>> {
    let mut suppliers: Vec<Box<dyn PreheatSupplier>> = vec![Box::new(DefaultsSupplier)];
    suppliers.extend(
        MetadataSupplier::all()
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn PreheatSupplier>),
    );
    suppliers.push(Box::new(ProgramDependencySupplier));
    suppliers.push(Box::new(UserSupplier));
    suppliers.extend(
        TrackerType::COMMIT_ORDER
            .into_iter()
            .map(|t| Box::new(TrackerObjectSupplier::new(t)) as Box<dyn PreheatSupplier>),
    );
    suppliers.push(Box::new(ExistingRelationshipSupplier));
    suppliers.push(Box::new(ProgramOwnerSupplier));
    suppliers.push(Box::new(EnrollmentWithoutRegistrationSupplier));
    suppliers.push(Box::new(CategoryOptionComboSupplier));
    suppliers
}
