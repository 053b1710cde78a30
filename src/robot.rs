// ─── Paso 3: Módulo Robot — Cliente HTTP del robot ───
//
// El robot expone un endpoint HTTP que recibe comandos como query params:
//
//     GET http://<robot>/robo?tipoQuery=mover&valor=-10
//
// `tipoQuery` es el nombre de la acción y `valor` su argumento numérico.
// Este módulo arma la URL en un buffer de capacidad fija y dispara el GET
// con el cliente HTTP de esp-idf.

use anyhow::{anyhow, Result};
use core::fmt::Write as _;
use embedded_svc::http::{client::Client, Headers, Status};
use embedded_svc::io::Read;
use esp_idf_svc::http::client::{Configuration as HttpConfig, EspHttpConnection};
use log::{info, warn};
use std::time::Duration;

// ─── Constantes ───

/// Endpoint por defecto: el robot levanta su propio AP y queda en la
/// IP de gateway estándar del esp-idf.
pub const DEFAULT_ROBOT_URL: &str = "http://192.168.4.1";
pub const DEFAULT_ROBOT_PATH: &str = "/robo";

/// Capacidad del buffer de URL. La URL se arma completa en stack;
/// si no entra, es un error (nunca truncamos una URL).
const MAX_URL_LEN: usize = 160;

/// Tamaño del buffer de lectura de la respuesta (en bytes).
const MAX_RECV_BUFFER: usize = 512;

/// Timeout del request HTTP completo.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

// ─── Tipos ───

/// Acciones que entiende el firmware del robot.
///
/// El nombre de wire (lo que viaja en `tipoQuery`) está fijado por el
/// endpoint remoto, por eso los variants usan los nombres del robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Mover,
    Girar,
}

impl Action {
    /// Nombre de la acción tal como viaja en el query param `tipoQuery`.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Action::Mover => "mover",
            Action::Girar => "girar",
        }
    }
}

/// Dirección del controlador remoto: URL base + ruta del recurso.
///
/// Se carga desde NVS; si el usuario no configuró nada, aplican los
/// defaults de arriba (ver secure_storage::load_config).
#[derive(Debug, Clone)]
pub struct RobotEndpoint {
    pub base_url: String,
    pub path: String,
}

// ─── Armado de URL ───

/// Arma la URL completa del comando en un buffer de capacidad fija.
///
/// Formato: `<base><path>?tipoQuery=<accion>&valor=<valor>`
/// El valor va como entero decimal, con signo si es negativo.
pub fn build_url(
    endpoint: &RobotEndpoint,
    action: Action,
    value: i32,
) -> Result<heapless::String<MAX_URL_LEN>> {
    let mut url = heapless::String::new();

    write!(
        url,
        "{}{}?tipoQuery={}&valor={}",
        endpoint.base_url,
        endpoint.path,
        action.wire_name(),
        value
    )
    .map_err(|_| {
        anyhow!(
            "robot URL exceeds {} bytes (base: {})",
            MAX_URL_LEN,
            endpoint.base_url
        )
    })?;

    Ok(url)
}

// ─── Envío de comandos ───

/// Envía una acción al robot via HTTP GET y retorna el status code.
///
/// Loguea status y content-length de la respuesta, y el primer chunk
/// del body. Un status no-2xx NO es un error: el comando llegó al
/// controlador, que decide qué hacer con él.
pub fn send_action(endpoint: &RobotEndpoint, action: Action, value: i32) -> Result<u16> {
    let url = build_url(endpoint, action, value)?;

    info!("Robot command: GET {}", url.as_str());

    let config = HttpConfig {
        timeout: Some(HTTP_TIMEOUT),
        ..Default::default()
    };

    let mut client = Client::wrap(EspHttpConnection::new(&config)?);

    let request = client.get(url.as_str())?;
    let mut response = request.submit().map_err(|e| anyhow!("{e:?}"))?;

    let status = response.status();
    let content_length = response
        .header("Content-Length")
        .and_then(|v| v.parse::<u64>().ok());

    info!(
        "Robot response: status={}, content-length={:?}",
        status, content_length
    );

    if !(200..300).contains(&status) {
        warn!("Robot returned non-2xx status: {}", status);
    }

    // Drenar el body: el primer chunk se loguea, el resto se descarta.
    // Sin drenar, la conexión no se puede reusar ni cerrar limpia.
    let mut buf = [0u8; MAX_RECV_BUFFER];
    let mut first_chunk = true;

    loop {
        let n = response.read(&mut buf).map_err(|e| anyhow!("{e:?}"))?;
        if n == 0 {
            break;
        }
        if first_chunk {
            let preview = std::str::from_utf8(&buf[..n]).unwrap_or("[non-UTF8 body]");
            info!("Robot body: {}", preview);
            first_chunk = false;
        }
    }

    Ok(status)
}

// ─── Tests ───

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(base: &str, path: &str) -> RobotEndpoint {
        RobotEndpoint {
            base_url: base.to_string(),
            path: path.to_string(),
        }
    }

    #[test]
    fn build_url_formats_action_and_value() {
        let ep = endpoint("http://192.168.4.1", "/robo");
        let url = build_url(&ep, Action::Girar, 30).unwrap();
        assert_eq!(url.as_str(), "http://192.168.4.1/robo?tipoQuery=girar&valor=30");
    }

    #[test]
    fn build_url_keeps_negative_sign() {
        let ep = endpoint("http://192.168.4.1", "/robo");
        let url = build_url(&ep, Action::Mover, -10).unwrap();
        assert_eq!(url.as_str(), "http://192.168.4.1/robo?tipoQuery=mover&valor=-10");
    }

    #[test]
    fn build_url_rejects_oversized_base() {
        let ep = endpoint(&"x".repeat(MAX_URL_LEN), "/robo");
        assert!(build_url(&ep, Action::Mover, 0).is_err());
    }

    #[test]
    fn wire_names_match_robot_firmware() {
        assert_eq!(Action::Mover.wire_name(), "mover");
        assert_eq!(Action::Girar.wire_name(), "girar");
    }
}
