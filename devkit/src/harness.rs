/*!
Harness de test: une prise et un sender factices dans un dossier temporaire,
avec assertions sur ce qui a été livré à la supervision.
*/

use crate::stubs::{Delivery, FakePlug, FakeSender};
use anyhow::{bail, Result};
use std::path::Path;
use tempfile::TempDir;

/// Rapport d'énergie par défaut, format du CLI de prise.
pub const ENERGY_FIXTURE: &str = "\
Current: 0.342 A
Voltage: 230.456 V
Power: 76.233 W
Total: 12.345 kWh";

/// Sortie info par défaut: une HS110(EU), deux lignes de bannière puis un
/// payload pseudo-JSON sur deux lignes (le budget de la famille HS110).
pub const INFO_FIXTURE: &str = "\
Sent:      {\"system\": {\"get_sysinfo\": {}}}
Received:
{'sw_ver': '1.2.5 Build 171213 Rel.101523', 'hw_ver': '2.1', 'type': 'IOT.SMARTPLUGSWITCH', 'model': 'HS110(EU)', 'mac': '50:C7:BF:11:22:33', 'dev_name': 'Wi-Fi Smart Plug With Energy Monitoring', 'alias': 'office-plug', 'relay_state': 1, 'on_time': 3600, 'active_mode': 'schedule', 'feature': 'TIM:ENE', 'updating': 0, 'icon_hash': '', 'rssi': -61,
 'led_off': 0, 'latitude': 52.080277, 'longitude': 5.123722, 'hwId': '044A516EE63C875F9458DA25C2CCC5A0', 'fwId': 'BFF24826FBC561803E49379DBE74FD71', 'deviceId': '8006E41A5D34EA3AD12B4F9D4F9BD1CC1A7B2705', 'oemId': 'E6B74B5CA3AC2B96B52B1BC8D81F1862', 'next_action': {'type': -1}, 'err_code': 0, 'latitude_i': 520802, 'longitude_i': 51237}";

/// Environnement complet pour tester une collecte de bout en bout.
pub struct TestHarness {
    root: TempDir,
    pub plug: FakePlug,
    pub sender: FakeSender,
}

impl TestHarness {
    /// Harness avec les sorties par défaut (HS110 européenne de bureau).
    pub fn new() -> Result<Self> {
        Self::with_outputs(ENERGY_FIXTURE, INFO_FIXTURE)
    }

    /// Harness avec des sorties de prise spécifiques.
    pub fn with_outputs(energy: &str, info: &str) -> Result<Self> {
        env_logger::try_init().ok();
        let root = TempDir::new()?;
        let plug = FakePlug::install(root.path(), energy, info)?;
        let sender = FakeSender::install(root.path())?;
        Ok(Self { root, plug, sender })
    }

    /// Harness dont le sender rejette les livraisons portant `key`.
    pub fn with_failing_key(energy: &str, info: &str, key: &str) -> Result<Self> {
        env_logger::try_init().ok();
        let root = TempDir::new()?;
        let plug = FakePlug::install(root.path(), energy, info)?;
        let sender = FakeSender::install_failing_for(root.path(), key)?;
        Ok(Self { root, plug, sender })
    }

    /// Dossier temporaire portant les scripts et journaux.
    pub fn dir(&self) -> &Path {
        self.root.path()
    }

    pub fn plug_cmd(&self) -> String {
        self.plug.command()
    }

    pub fn sender_cmd(&self) -> String {
        self.sender.command()
    }

    /// Toutes les livraisons, dans l'ordre d'envoi.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.sender.deliveries()
    }

    /// Valeur livrée pour une clé, si la clé est partie.
    pub fn delivered_value(&self, key: &str) -> Option<String> {
        self.sender
            .deliveries()
            .iter()
            .find(|d| d.key().as_deref() == Some(key))
            .and_then(|d| d.value())
    }

    /// Assert qu'une clé est partie avec exactement cette valeur.
    pub fn assert_delivered(&self, key: &str, value: &str) -> Result<()> {
        match self.delivered_value(key) {
            Some(v) if v == value => {
                log::info!("✅ {}={} délivré", key, value);
                Ok(())
            }
            Some(v) => bail!("valeur inattendue pour {}: '{}' (attendu '{}')", key, v, value),
            None => bail!("aucune livraison pour {}", key),
        }
    }
}
