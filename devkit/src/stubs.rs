/*!
Binaires factices remplaçant les deux outils externes.

Chaque script enregistre ses invocations dans un journal, ce qui permet aux
tests de vérifier combien de fois la prise a été interrogée et ce qui est
parti vers la supervision, sans prise ni serveur réels.
*/

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Faux CLI de prise: rejoue des sorties fixes et journalise chaque appel.
///
/// Invoqué comme le vrai outil: `fake-plug <hôte> <emeter|info>`.
pub struct FakePlug {
    path: PathBuf,
    log: PathBuf,
}

impl FakePlug {
    /// Installe le script dans `dir` avec les deux sorties fournies.
    pub fn install(dir: &Path, energy: &str, info: &str) -> Result<Self> {
        let path = dir.join("fake-plug");
        let log = dir.join("plug-calls.log");
        let script = format!(
            r#"#!/bin/sh
printf '%s\n' "$*" >> "{log}"
case "$2" in
emeter) cat <<'PLUGEOF'
{energy}
PLUGEOF
;;
info) cat <<'PLUGEOF'
{info}
PLUGEOF
;;
esac
"#,
            log = log.display(),
            energy = energy,
            info = info,
        );
        write_script(&path, &script)?;
        log::info!("🔌 [STUB] Fake plug installé: {}", path.display());
        Ok(Self { path, log })
    }

    /// Variante en échec: journalise, écrit `text` sur stdout et sort en code 3.
    pub fn install_failing(dir: &Path, text: &str) -> Result<Self> {
        let path = dir.join("fake-plug");
        let log = dir.join("plug-calls.log");
        let script = format!(
            r#"#!/bin/sh
printf '%s\n' "$*" >> "{log}"
echo "{text}"
exit 3
"#,
            log = log.display(),
            text = text,
        );
        write_script(&path, &script)?;
        Ok(Self { path, log })
    }

    /// Chemin du script, utilisable comme ligne de commande.
    pub fn command(&self) -> String {
        self.path.display().to_string()
    }

    /// Toutes les invocations enregistrées, sous la forme `<hôte> <endpoint>`.
    pub fn calls(&self) -> Vec<String> {
        read_log(&self.log)
    }

    /// Nombre d'invocations pour un endpoint donné.
    pub fn calls_for(&self, endpoint: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split_whitespace().last() == Some(endpoint))
            .count()
    }
}

/// Faux sender: enregistre argv et la ligne d'item lue sur stdin.
pub struct FakeSender {
    path: PathBuf,
    log: PathBuf,
}

impl FakeSender {
    /// Installe un sender qui accepte tout.
    pub fn install(dir: &Path) -> Result<Self> {
        let path = dir.join("fake-sender");
        let log = dir.join("deliveries.log");
        let script = format!(
            r#"#!/bin/sh
line=$(cat)
printf '%s | %s\n' "$*" "$line" >> "{log}"
exit 0
"#,
            log = log.display(),
        );
        write_script(&path, &script)?;
        log::info!("📮 [STUB] Fake sender installé: {}", path.display());
        Ok(Self { path, log })
    }

    /// Installe un sender qui rejette (code 2) toute ligne portant cette clé.
    pub fn install_failing_for(dir: &Path, key: &str) -> Result<Self> {
        let path = dir.join("fake-sender");
        let log = dir.join("deliveries.log");
        let script = format!(
            r#"#!/bin/sh
line=$(cat)
printf '%s | %s\n' "$*" "$line" >> "{log}"
case "$line" in
*"[{key}]"*) exit 2 ;;
esac
exit 0
"#,
            log = log.display(),
            key = key,
        );
        write_script(&path, &script)?;
        Ok(Self { path, log })
    }

    /// Chemin du script, utilisable comme ligne de commande.
    pub fn command(&self) -> String {
        self.path.display().to_string()
    }

    /// Toutes les livraisons enregistrées, dans l'ordre.
    pub fn deliveries(&self) -> Vec<Delivery> {
        read_log(&self.log).iter().filter_map(|record| Delivery::parse(record)).collect()
    }
}

/// Une livraison enregistrée: argv du sender et ligne d'item reçue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub args: String,
    pub line: String,
}

impl Delivery {
    fn parse(record: &str) -> Option<Self> {
        let (args, line) = record.split_once(" | ")?;
        Some(Self { args: args.to_string(), line: line.to_string() })
    }

    /// Clé d'item de la ligne `- espace[clé] valeur`.
    pub fn key(&self) -> Option<String> {
        let open = self.line.find('[')?;
        let close = self.line.find(']')?;
        if close <= open {
            return None;
        }
        Some(self.line[open + 1..close].to_string())
    }

    /// Valeur de la ligne, éventuellement vide.
    pub fn value(&self) -> Option<String> {
        self.line.split_once("] ").map(|(_, value)| value.to_string())
    }
}

fn write_script(path: &Path, body: &str) -> Result<()> {
    fs::write(path, body).with_context(|| format!("écriture de {}", path.display()))?;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

fn read_log(log: &Path) -> Vec<String> {
    match fs::read_to_string(log) {
        Ok(txt) => txt.lines().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}
