pub mod congress_gov;
pub mod fixture;
