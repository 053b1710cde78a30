// ─── Paso 3: Módulo WiFi — Conexión a red WiFi con reintentos ───
//
// Igual que en el paso 2, una sola función pública: connect(). La novedad
// es el manejo de reintentos: si la conexión o el lease de DHCP fallan,
// se reintenta hasta 5 veces antes de rendirse.
//
// En el esp-idf en C esto se hacía con un event group de FreeRTOS y dos
// bits mutuamente excluyentes (CONNECTED / FAIL). BlockingWifi ya bloquea
// sobre el mismo event loop, así que los dos bits quedan representados
// por el Ok / Err del retorno: exactamente uno ocurre por llamada.

use anyhow::{bail, Result};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::peripheral,
    wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi},
};
use log::{info, warn};
use std::time::Duration;

/// Número máximo de intentos de conexión antes de rendirse.
const MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Pausa entre intentos fallidos.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Conecta el ESP32 a una red WiFi en modo Station, con reintentos.
///
/// Retorna `Box<EspWifi<'static>>` — el driver WiFi en el heap.
/// IMPORTANTE: mientras el Box exista, la conexión WiFi se mantiene.
/// Si se dropea, la conexión se pierde (RAII).
pub fn connect(
    ssid: &str,
    password: &str,
    modem: impl peripheral::Peripheral<P = esp_idf_svc::hal::modem::Modem> + 'static,
    sysloop: EspSystemEventLoop,
) -> Result<Box<EspWifi<'static>>> {
    // ─── Validación de credenciales ───

    let mut auth_method = AuthMethod::WPA2Personal;
    if ssid.is_empty() {
        bail!("WiFi SSID not configured");
    }

    // Debug: loguear longitud del password (nunca el password en sí)
    info!("WiFi password length: {} bytes", password.len());

    if password.is_empty() {
        auth_method = AuthMethod::None;
        info!("WiFi password empty, using open network");
    }

    // ─── Crear driver WiFi ───

    // EspWifi::new() toma ownership del modem — nadie más puede usar el radio.
    // None = sin NVS partition (no persistimos config WiFi en flash).
    let mut esp_wifi = EspWifi::new(modem, sysloop.clone(), None)?;

    // BlockingWifi wrappea el driver async en API síncrona.
    // Usa &mut (borrow) — NO toma ownership de esp_wifi.
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sysloop)?;

    // Configuración default para poder hacer start() y scan()
    wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))?;

    info!("Starting WiFi...");
    wifi.start()?;

    // ─── Scan de redes ───

    // Escaneamos para encontrar el canal exacto del AP.
    // Con el canal correcto, la conexión es más rápida.
    info!("Scanning for networks...");
    let ap_infos = wifi.scan()?;

    let target_ap = ap_infos.into_iter().find(|ap| ap.ssid == ssid);

    let channel = target_ap.as_ref().map(|ap| ap.channel);

    match channel {
        Some(ch) => info!("Found AP '{}' on channel {}", ssid, ch),
        // Sin canal también se puede conectar, solo tarda más.
        None => warn!("AP '{}' not found in scan, connecting blind", ssid),
    }

    // ─── Configurar con credenciales reales ───

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: ssid.try_into().expect("SSID too long"),
        password: password.try_into().expect("Password too long"),
        channel,
        auth_method,
        ..Default::default()
    }))?;

    // ─── Conectar y obtener IP, con reintentos ───
    //
    // Cada intento es connect() + wait_netif_up(): sin lease de DHCP la
    // conexión no sirve (ni HTTP, ni DNS). Un intento fallido desconecta
    // y vuelve a probar. El contador es por llamada a connect() — una
    // conexión lograda deja los intentos en cero para la próxima.

    let mut last_err = None;

    for attempt in 1..=MAX_CONNECT_ATTEMPTS {
        info!(
            "Connecting to '{}' (attempt {}/{})...",
            ssid, attempt, MAX_CONNECT_ATTEMPTS
        );

        match wifi.connect() {
            Ok(()) => match wifi.wait_netif_up() {
                Ok(()) => {
                    last_err = None;
                    break;
                }
                Err(e) => {
                    warn!("DHCP lease failed on attempt {}: {:?}", attempt, e);
                    last_err = Some(e);
                }
            },
            Err(e) => {
                warn!("Connect failed on attempt {}: {:?}", attempt, e);
                last_err = Some(e);
            }
        }

        if attempt < MAX_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            std::thread::sleep(RETRY_DELAY);
        }
    }

    if let Some(e) = last_err {
        bail!(
            "failed to connect to '{}' after {} attempts: {:?}",
            ssid,
            MAX_CONNECT_ATTEMPTS,
            e
        );
    }

    let ip_info = wifi.wifi().sta_netif().get_ip_info()?;

    info!("WiFi connected!");
    info!("IP: {}", ip_info.ip);
    info!("Gateway: {}", ip_info.subnet.gateway);
    info!("Mask: {}", ip_info.subnet.mask);

    // Retornamos esp_wifi en un Box (heap allocation).
    // BlockingWifi se dropea aquí, pero la conexión sigue porque
    // el driver real (esp_wifi) sigue vivo en el Box.
    Ok(Box::new(esp_wifi))
}
