// ─── Paso 3: Módulo Secure Storage — Configuración del dispositivo en NVS ───
//
// NVS (Non-Volatile Storage) es la "flash persistente" del ESP32.
// Sobrevive reinicios y power cycles. Es como un key-value store
// guardado en una partición dedicada de la flash.
//
// Además de las credenciales WiFi, en este paso guardamos la dirección
// del controlador del robot (URL base + ruta). Las credenciales se
// borran de memoria automáticamente al salir de scope (Zeroize).

use anyhow::{bail, Result};
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use log::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::robot::{DEFAULT_ROBOT_PATH, DEFAULT_ROBOT_URL};

// ─── Constantes NVS ───

const NVS_NAMESPACE: &str = "config";
const KEY_WIFI_SSID: &str = "wifi_ssid";
const KEY_WIFI_PASS: &str = "wifi_pass";
const KEY_ROBOT_URL: &str = "robot_url";
const KEY_ROBOT_PATH: &str = "robot_path";
const KEY_PROVISIONED: &str = "provisioned";

// ─── Struct de configuración con borrado seguro ───

/// Configuración del dispositivo, con borrado automático de memoria.
///
/// `Zeroize` permite llamar .zeroize() manualmente.
/// `ZeroizeOnDrop` lo hace automáticamente cuando el struct sale de scope.
/// La URL del robot no es secreta, pero viaja junto a las credenciales
/// WiFi, que sí lo son — se borra todo el struct de una.
#[derive(Debug, Default, Zeroize, ZeroizeOnDrop)]
pub struct DeviceConfig {
    pub wifi_ssid: String,
    pub wifi_password: String,
    pub robot_url: String,
    pub robot_path: String,
}

// ─── Secure Storage Manager ───

/// Manager de almacenamiento seguro usando NVS del ESP32.
///
/// Encapsula un handle de NVS con namespace "config".
/// Todas las operaciones de lectura/escritura pasan por aquí.
pub struct SecureStorage {
    nvs: EspNvs<NvsDefault>,
}

impl SecureStorage {
    /// Inicializa el storage con la partición NVS default.
    /// `true` en EspNvs::new = crear namespace si no existe.
    pub fn new(nvs_partition: EspNvsPartition<NvsDefault>) -> Result<Self> {
        let nvs = EspNvs::new(nvs_partition, NVS_NAMESPACE, true)?;
        info!(
            "SecureStorage initialized with namespace: {}",
            NVS_NAMESPACE
        );
        Ok(Self { nvs })
    }

    /// Verifica si el dispositivo ya fue provisionado.
    /// Lee un flag u8 de NVS: 1 = provisionado, 0 o ausente = no.
    pub fn is_provisioned(&self) -> Result<bool> {
        match self.nvs.get_u8(KEY_PROVISIONED) {
            Ok(Some(val)) => Ok(val == 1),
            Ok(None) => Ok(false),
            Err(e) => {
                warn!("Error checking provisioned status: {:?}", e);
                Ok(false)
            }
        }
    }

    /// Guarda la configuración en NVS y la zeroiza de la entrada.
    ///
    /// Cada campo se guarda como string independiente en NVS.
    /// Al final, marca el flag "provisioned" = 1.
    pub fn store_config(&mut self, mut config: DeviceConfig) -> Result<()> {
        self.nvs.set_str(KEY_WIFI_SSID, &config.wifi_ssid)?;
        self.nvs.set_str(KEY_WIFI_PASS, &config.wifi_password)?;
        self.nvs.set_str(KEY_ROBOT_URL, &config.robot_url)?;
        self.nvs.set_str(KEY_ROBOT_PATH, &config.robot_path)?;

        // Marcar como provisionado
        self.nvs.set_u8(KEY_PROVISIONED, 1)?;

        // Zeroizar explícitamente la configuración de entrada
        config.zeroize();

        info!("Device config stored securely");
        Ok(())
    }

    /// Carga la configuración desde NVS.
    ///
    /// Retorna un DeviceConfig con ZeroizeOnDrop — al salir de scope
    /// se borra automáticamente de memoria. Si el usuario dejó vacía
    /// la dirección del robot, aplican los defaults del módulo robot.
    pub fn load_config(&self) -> Result<DeviceConfig> {
        if !self.is_provisioned()? {
            bail!("Device not provisioned. Run provisioning first.");
        }

        let mut config = DeviceConfig::default();

        // Buffer temporal para lecturas — también se zeroiza después de cada uso
        let mut buf = [0u8; 256];

        if let Some(val) = self.nvs.get_str(KEY_WIFI_SSID, &mut buf)? {
            config.wifi_ssid = val.trim_end_matches('\0').to_string();
            buf.zeroize();
        }

        if let Some(val) = self.nvs.get_str(KEY_WIFI_PASS, &mut buf)? {
            config.wifi_password = val.trim_end_matches('\0').to_string();
            buf.zeroize();
        }

        if let Some(val) = self.nvs.get_str(KEY_ROBOT_URL, &mut buf)? {
            config.robot_url = val.trim_end_matches('\0').to_string();
            buf.zeroize();
        }

        if let Some(val) = self.nvs.get_str(KEY_ROBOT_PATH, &mut buf)? {
            config.robot_path = val.trim_end_matches('\0').to_string();
            buf.zeroize();
        }

        if config.robot_url.is_empty() {
            config.robot_url = DEFAULT_ROBOT_URL.to_string();
        }
        if config.robot_path.is_empty() {
            config.robot_path = DEFAULT_ROBOT_PATH.to_string();
        }

        info!("Device config loaded from NVS");
        Ok(config)
    }

    /// Borra toda la configuración de NVS (factory reset).
    ///
    /// Sobreescribe con strings vacíos antes de marcar como no provisionado.
    #[allow(dead_code)]
    pub fn clear_config(&mut self) -> Result<()> {
        warn!("Clearing all device config from NVS...");

        self.nvs.set_str(KEY_WIFI_SSID, "")?;
        self.nvs.set_str(KEY_WIFI_PASS, "")?;
        self.nvs.set_str(KEY_ROBOT_URL, "")?;
        self.nvs.set_str(KEY_ROBOT_PATH, "")?;
        self.nvs.set_u8(KEY_PROVISIONED, 0)?;

        info!("Device config cleared");
        Ok(())
    }
}
