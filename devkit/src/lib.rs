/*!
# Plugwatch DevKit - Binaires factices pour développement

Bibliothèque facilitant le développement de plugwatch avec:
- Faux CLI de prise (sorties rejouées + journal d'appels)
- Faux sender (livraisons enregistrées + échecs simulés)
- Harness de test avec assertions sur les livraisons
*/

pub mod harness;
pub mod stubs;

pub use harness::TestHarness;
pub use stubs::{Delivery, FakePlug, FakeSender};
