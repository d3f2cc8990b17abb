/*!
# keastat DevKit - Stubs and test utilities

Development library for keastat:
- Mock Kea Control Agent (scripted answers, recorded requests)
- Mock carbon line receiver
- Builders for Kea configuration and statistic documents
- Test harness bundling both mocks
*/

pub mod carbon_stub;
pub mod kea_fixtures;
pub mod kea_stub;
pub mod test_utils;

pub use carbon_stub::MockCarbon;
pub use kea_fixtures::KeaFixtures;
pub use kea_stub::MockControlAgent;
pub use test_utils::TestHarness;
