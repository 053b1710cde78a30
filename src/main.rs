// ─── Paso 3: Robo Cliente — WiFi Station + comandos HTTP al robot ───
//
// El ESP32 se conecta a la red WiFi del robot y le manda comandos por
// HTTP GET: una acción (mover, girar) y su valor numérico como query
// params. Si no tiene configuración guardada, entra en modo provisioning
// igual que en el paso 2.
//
// Módulo nuevo: robot (cliente HTTP del controlador)

// ─── Módulos ───

mod provisioning;
mod robot;
mod secure_storage;
mod wifi;

// ─── Imports ───

use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::PinDriver;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;

#[allow(unused_imports)]
use esp_idf_svc::sys as _;

use log::{error, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use robot::{Action, RobotEndpoint};
use secure_storage::SecureStorage;

// Pausa entre los dos comandos de demo. El firmware original esperaba
// 200 ticks de FreeRTOS a 100 Hz entre comando y comando.
const COMMAND_GAP_MS: u32 = 2000;

// ─── Punto de entrada ───
//
// Patrón main() → run(): main() no retorna Result, así que no puede usar ?.
// Delegamos toda la lógica a run() que sí retorna Result.
// Si run() falla, logueamos el error, esperamos 10s y reiniciamos el chip.

fn main() {
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("paso-03-robo-cliente");

    if let Err(e) = run() {
        error!("Error fatal: {:?}", e);
        error!("Reiniciando en 10 segundos...");
        std::thread::sleep(Duration::from_secs(10));
        unsafe {
            esp_idf_svc::sys::esp_restart();
        }
    }
}

fn run() -> anyhow::Result<()> {
    // ─── Inicialización del sistema ───

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;

    // NVS partition — tomar la partición default también inicializa la
    // flash NVS (el nvs_init del firmware original)
    let nvs_partition = EspDefaultNvsPartition::take()?;

    // LED en GPIO8 — heartbeat, herencia de los pasos anteriores
    let mut led = PinDriver::output(peripherals.pins.gpio8)?;

    info!("LED configurado en GPIO8");

    // ─── Secure Storage ───

    // Arc<Mutex<T>> permite compartir SecureStorage entre main y el
    // handler HTTP del provisioning (que corre en otro thread).
    let storage = SecureStorage::new(nvs_partition.clone())?;
    let storage = Arc::new(Mutex::new(storage));

    // ─── Check: ¿Está provisionado? ───

    let is_provisioned = {
        let storage = storage.lock().unwrap();
        storage.is_provisioned()?
    };

    if !is_provisioned {
        // ─── Modo Provisioning ───
        //
        // El dispositivo no tiene configuración guardada.
        // Crear Access Point para que el usuario configure via browser.

        warn!("Device not provisioned!");
        info!("Starting provisioning mode...");
        info!("Connect to WiFi: 'Robo-Setup' / Password: 'setup1234'");
        info!("Then open http://192.168.4.1 in your browser");

        // start_provisioning() NUNCA retorna — reinicia el chip al completar
        provisioning::start_provisioning(peripherals.modem, sysloop, storage)?;

        return Ok(());
    }

    // ─── Modo Normal: Conectar a WiFi ───

    info!("Device is provisioned, loading config...");

    let config = {
        let storage = storage.lock().unwrap();
        storage.load_config()?
    };

    info!("Robot endpoint: {}{}", config.robot_url, config.robot_path);
    info!("Connecting to WiFi: {}", config.wifi_ssid);

    // wifi::connect() retorna Box<EspWifi> — debe mantenerse vivo.
    // Si _wifi se dropea, la conexión WiFi se pierde (RAII).
    let _wifi = wifi::connect(
        &config.wifi_ssid,
        &config.wifi_password,
        peripherals.modem,
        sysloop,
    )?;

    info!("Modo STA activo");

    // El endpoint del robot se copia antes del drop: lo único que hay
    // que zeroizar cuanto antes son las credenciales WiFi.
    let endpoint = RobotEndpoint {
        base_url: config.robot_url.clone(),
        path: config.robot_path.clone(),
    };

    // drop() explícito para zeroizar credenciales de memoria.
    // ZeroizeOnDrop sobreescribe los Strings con ceros antes de liberar.
    drop(config);
    info!("Credentials zeroized from memory");

    // ─── Comandos de demo al robot ───
    //
    // La misma secuencia del firmware original: mover -10, pausa,
    // girar 30. Un comando fallido se loguea y se sigue — el robot
    // puede no estar escuchando todavía.

    if let Err(e) = robot::send_action(&endpoint, Action::Mover, -10) {
        warn!("Command 'mover' failed: {:?}", e);
    }

    FreeRtos::delay_ms(COMMAND_GAP_MS);

    if let Err(e) = robot::send_action(&endpoint, Action::Girar, 30) {
        warn!("Command 'girar' failed: {:?}", e);
    }

    // ─── Loop principal: LED heartbeat ───
    //
    // El LED parpadea como prueba de vida. En pasos futuros este loop
    // manejará una cola de comandos, telemetría, etc.

    info!("Entering main loop...");
    loop {
        led.set_high()?;
        FreeRtos::delay_ms(500);

        led.set_low()?;
        FreeRtos::delay_ms(500);
    }
}
