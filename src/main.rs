use std::process;

use pingora_core::{
    server::{configuration::Opt, Server},
    services::{background::background_service, listening::Service},
};

use routerflow::{config::Config, logging::Logger, service::CoordinatorService};

fn main() {
    // Read command-line arguments
    let opt = Opt::parse_args();

    let config = match Config::load_yaml_with_opt_override(&opt) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    // Logs go to the configured file, stderr otherwise
    let logger = config.coordinator.log.clone().map(|log| {
        let logger = Logger::new(log);
        logger.init_env_logger();
        logger
    });
    if logger.is_none() {
        env_logger::init();
    }

    let mut server = Server::new_with_opt_and_conf(Some(opt), config.pingora);

    log::info!("Bootstrapping...");
    server.bootstrap();

    log::info!("Bootstrapped. Adding Services...");
    if let Some(logger) = logger {
        server.add_service(logger);
    }

    if let Some(prometheus) = &config.coordinator.prometheus {
        let mut prometheus_service_http = Service::prometheus_http_service();
        prometheus_service_http.add_tcp(&prometheus.address.to_string());
        server.add_service(prometheus_service_http);
    }

    server.add_service(background_service(
        "routerflow coordinator",
        CoordinatorService::new(config.coordinator),
    ));

    log::info!("Starting Server...");
    server.run_forever();
}
