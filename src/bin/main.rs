//! minikube CLI - run a single-node Kubernetes cluster in a local VM

use clap::{Args, Parser, Subcommand};
use minikube::assets::{builtin_addons, find_addon, Addon};
use minikube::constants::*;
use minikube::prompt::{ask_static_value, ask_yes_no, NEGATIVE_RESPONSES, POSITIVE_RESPONSES};
use minikube::service::{create_secret, ServiceResolver};
use minikube::ssh::{transfer_file, CommandChannel};
use minikube::template::DEFAULT_SERVICE_FORMAT;
use minikube::{
    bootstrap, certs, config, retry_after, AssetCache, BuiltinDrivers, DriverKind, Error,
    ExtraOption, FileHostStore, HostManager, KubeClusterApi, KubernetesConfig, MachineConfig,
    Result, Settings, UrlTemplate, START_HOST_POLICY,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tabled::{Table, Tabled};

#[derive(Parser)]
#[command(name = "minikube")]
#[command(about = "Run Kubernetes locally in a single VM")]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a local Kubernetes cluster
    Start(StartArgs),
    /// Stop the running cluster VM
    Stop,
    /// Delete the cluster VM and its record
    Delete,
    /// Print the VM and cluster status
    Status,
    /// Print the VM's IP address
    Ip,
    /// Print the control-plane logs
    Logs,
    /// Print commands that point a docker client at the VM's daemon
    DockerEnv,
    /// Print or open the URL of a NodePort service
    Service(ServiceArgs),
    /// Read and write persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage cluster add-ons
    Addons {
        #[command(subcommand)]
        action: AddonsAction,
    },
}

#[derive(Args)]
struct StartArgs {
    /// Hypervisor backend (virtualbox, vmwarefusion, kvm, hyperv)
    #[arg(long, default_value = DEFAULT_VM_DRIVER)]
    vm_driver: String,
    /// Memory in MB
    #[arg(long, default_value_t = DEFAULT_MEMORY_MB)]
    memory: u64,
    /// CPU count
    #[arg(long, default_value_t = DEFAULT_CPUS)]
    cpus: u32,
    /// Disk size in MB
    #[arg(long, default_value_t = DEFAULT_DISK_SIZE_MB)]
    disk_size: u64,
    /// Boot image location
    #[arg(long, default_value = DEFAULT_ISO_URL)]
    iso_url: String,
    /// Host-only network CIDR (gateway/prefix)
    #[arg(long, default_value = DEFAULT_HOST_ONLY_CIDR)]
    host_only_cidr: String,
    /// Release tag or URI of the localkube binary
    #[arg(long, default_value = DEFAULT_KUBERNETES_VERSION)]
    kubernetes_version: String,
    #[arg(long)]
    container_runtime: Option<String>,
    #[arg(long)]
    network_plugin: Option<String>,
    #[arg(long)]
    feature_gates: Option<String>,
    #[arg(long, default_value = DEFAULT_DNS_DOMAIN)]
    dns_domain: String,
    /// component.key=value passed to one control-plane component
    #[arg(long = "extra-config", value_parser = parse_extra_option)]
    extra_config: Vec<ExtraOption>,
    /// KEY=VALUE for the docker daemon's environment
    #[arg(long)]
    docker_env: Vec<String>,
    #[arg(long)]
    insecure_registry: Vec<String>,
    #[arg(long)]
    registry_mirror: Vec<String>,
}

#[derive(Args)]
#[command(args_conflicts_with_subcommands = true)]
struct ServiceArgs {
    #[command(subcommand)]
    action: Option<ServiceAction>,
    /// Service name
    name: Option<String>,
    #[arg(short, long, default_value = "default", global = true)]
    namespace: String,
    /// Print the URL instead of opening it
    #[arg(long)]
    url: bool,
    /// Use https instead of http
    #[arg(long)]
    https: bool,
    /// URL format, with {{.IP}} and {{.Port}} fields
    #[arg(long, default_value = DEFAULT_SERVICE_FORMAT, global = true)]
    format: String,
}

#[derive(Subcommand)]
enum ServiceAction {
    /// List the URLs of every service in the namespace
    List,
}

#[derive(Subcommand)]
enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
    Unset { key: String },
    View,
}

#[derive(Subcommand)]
enum AddonsAction {
    List,
    Enable { name: String },
    Disable { name: String },
    /// Prompt for an add-on's credentials
    Configure { name: String },
}

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "NAMESPACE")]
    namespace: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "URL")]
    url: String,
}

fn parse_extra_option(s: &str) -> std::result::Result<ExtraOption, String> {
    s.parse().map_err(|e: Error| e.to_string())
}

/// Local state every command works against
struct Context {
    home: PathBuf,
    store: FileHostStore,
    drivers: BuiltinDrivers,
    cache: AssetCache,
}

impl Context {
    fn new() -> Self {
        let home = minipath();
        let store = FileHostStore::in_home(&home);
        let drivers = BuiltinDrivers::new(store.root());
        let cache = AssetCache::in_home(&home);
        Self {
            home,
            store,
            drivers,
            cache,
        }
    }

    fn manager(&self) -> HostManager<'_> {
        HostManager::new(&self.home, &self.store, &self.drivers, &self.cache)
    }

    fn settings(&self) -> Result<Settings> {
        Settings::load(Settings::default_path(&self.home))
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("minikube=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("minikube=warn"))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let ctx = Context::new();
    let result = match cli.command {
        Commands::Start(args) => cmd_start(&ctx, args),
        Commands::Stop => cmd_stop(&ctx),
        Commands::Delete => cmd_delete(&ctx),
        Commands::Status => cmd_status(&ctx),
        Commands::Ip => cmd_ip(&ctx),
        Commands::Logs => cmd_logs(&ctx),
        Commands::DockerEnv => cmd_docker_env(&ctx),
        Commands::Service(args) => cmd_service(&ctx, args),
        Commands::Config { action } => handle_config(&ctx, action),
        Commands::Addons { action } => handle_addons(&ctx, action),
    };

    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn cmd_start(ctx: &Context, args: StartArgs) -> Result<()> {
    if let Err(e) = args.vm_driver.parse::<DriverKind>() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    let mut machine = MachineConfig::builder()
        .vm_driver(args.vm_driver)
        .memory_mb(args.memory)
        .cpus(args.cpus)
        .disk_size_mb(args.disk_size)
        .iso_url(args.iso_url)
        .host_only_cidr(args.host_only_cidr)
        .build();
    machine.docker_env = args.docker_env;
    machine.insecure_registry = args.insecure_registry;
    machine.registry_mirror = args.registry_mirror;
    machine.validate()?;

    println!("Starting local Kubernetes cluster...");
    let manager = ctx.manager();
    manager
        .ensure_started_with_retry(&machine, START_HOST_POLICY)
        .map_err(|e| e.context("Error starting host"))?;

    let driver = manager.driver()?;
    let ip = driver.ip()?;

    let mut k8s = KubernetesConfig::builder()
        .kubernetes_version(args.kubernetes_version)
        .node_ip(&ip)
        .dns_domain(args.dns_domain);
    if let Some(runtime) = args.container_runtime {
        k8s = k8s.container_runtime(runtime);
    }
    if let Some(plugin) = args.network_plugin {
        k8s = k8s.network_plugin(plugin);
    }
    if let Some(gates) = args.feature_gates {
        k8s = k8s.feature_gates(gates);
    }
    for option in args.extra_config {
        k8s = k8s.extra_option(option);
    }
    let k8s = k8s.build();
    k8s.validate()?;

    println!("Setting up certs...");
    certs::setup_certs(driver.as_ref(), &ctx.home)
        .map_err(|e| e.context("Error configuring authentication"))?;

    println!("Moving files into cluster...");
    let settings = ctx.settings()?;
    let assets = bootstrap::ClusterAssets::new(&ctx.home, &settings, &ctx.cache);
    bootstrap::update_cluster(driver.as_ref(), &k8s, &assets)
        .map_err(|e| e.context("Error updating cluster"))?;

    println!("Starting cluster components...");
    bootstrap::start_cluster(driver.as_ref(), &k8s)
        .map_err(|e| e.context("Error starting cluster"))?;

    println!("Kubernetes is available at https://{ip}:{API_SERVER_PORT}");
    Ok(())
}

fn cmd_stop(ctx: &Context) -> Result<()> {
    println!("Stopping local Kubernetes cluster...");
    ctx.manager().stop()?;
    println!("Machine stopped.");
    Ok(())
}

fn cmd_delete(ctx: &Context) -> Result<()> {
    println!("Deleting local Kubernetes cluster...");
    ctx.manager().delete()?;
    println!("Machine deleted.");
    Ok(())
}

fn cmd_status(ctx: &Context) -> Result<()> {
    let manager = ctx.manager();
    let machine = manager.status()?;
    println!("minikubeVM: {machine}");
    if machine == "Running" {
        let cluster = manager.cluster_status()?;
        println!("localkube: {cluster}");
    } else {
        println!("localkube: N/A");
    }
    Ok(())
}

fn cmd_ip(ctx: &Context) -> Result<()> {
    println!("{}", ctx.manager().ip()?);
    Ok(())
}

fn cmd_logs(ctx: &Context) -> Result<()> {
    print!("{}", ctx.manager().logs()?);
    Ok(())
}

fn cmd_docker_env(ctx: &Context) -> Result<()> {
    for (key, value) in ctx.manager().docker_env()? {
        println!("export {key}=\"{value}\"");
    }
    println!("# Run this command to configure your shell:");
    println!("# eval $(minikube docker-env)");
    Ok(())
}

fn cmd_service(ctx: &Context, args: ServiceArgs) -> Result<()> {
    let manager = ctx.manager();
    manager.ensure_running_or_exit(1);

    let ip = manager.ip()?;
    let template = UrlTemplate::new(&args.format)?;
    let cluster = KubeClusterApi::new()?;
    let resolver = ServiceResolver::new(&cluster, ip);

    if let Some(ServiceAction::List) = args.action {
        let services = resolver.resolve_all_service_urls(&args.namespace, Some(&template))?;
        let rows: Vec<ServiceRow> = services
            .into_iter()
            .map(|s| ServiceRow {
                namespace: s.namespace,
                name: s.name,
                url: if s.urls.is_empty() {
                    "No node port".to_string()
                } else {
                    s.urls.join("\n")
                },
            })
            .collect();
        println!("{}", Table::new(rows));
        return Ok(());
    }

    let name = args
        .name
        .ok_or_else(|| Error::Config("service name is required".into()))?;
    let urls = match resolver.wait_and_resolve(&args.namespace, &name, Some(&template), args.https) {
        Ok(urls) => urls,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("Check that minikube is running and that you have specified the correct namespace (-n flag).");
            std::process::exit(1);
        }
    };

    for url in urls {
        if args.url || !url.starts_with("http") {
            println!("{url}");
        } else {
            println!("Opening kubernetes service {}/{} in default browser...", args.namespace, name);
            open_url(&url);
        }
    }
    Ok(())
}

fn open_url(url: &str) {
    let mut cmd = if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else if cfg!(windows) {
        let mut cmd = std::process::Command::new("cmd");
        cmd.args(["/C", "start", ""]);
        cmd
    } else {
        std::process::Command::new("xdg-open")
    };
    if let Err(e) = cmd.arg(url).status() {
        eprintln!("Could not open {url}: {e}");
    }
}

fn handle_config(ctx: &Context, action: ConfigAction) -> Result<()> {
    let mut settings = ctx.settings()?;
    match action {
        ConfigAction::Get { key } => match settings.get(&key) {
            Some(value) => println!("{}", display_value(value)),
            None => return Err(Error::Config(format!("specified key could not be found in config: {key}"))),
        },
        ConfigAction::Set { key, value } => {
            settings.set(key, config::parse_setting_value(&value));
            settings.save()?;
        }
        ConfigAction::Unset { key } => {
            if settings.unset(&key) {
                settings.save()?;
            }
        }
        ConfigAction::View => {
            for (key, value) in settings.iter() {
                println!("- {}: {}", key, display_value(value));
            }
        }
    }
    Ok(())
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn handle_addons(ctx: &Context, action: AddonsAction) -> Result<()> {
    match action {
        AddonsAction::List => {
            let settings = ctx.settings()?;
            for addon in builtin_addons() {
                let status = if addon.is_enabled(&settings)? { "enabled" } else { "disabled" };
                println!("- {}: {}", addon.name, status);
            }
        }
        AddonsAction::Enable { name } => set_addon(ctx, &name, true)?,
        AddonsAction::Disable { name } => set_addon(ctx, &name, false)?,
        AddonsAction::Configure { name } => configure_addon(ctx, &name)?,
    }
    Ok(())
}

fn lookup_addon(name: &str) -> Result<Addon> {
    find_addon(name).ok_or_else(|| Error::Config(format!("{name} is not a valid addon")))
}

/// Persist the choice, then apply it to a running VM
fn set_addon(ctx: &Context, name: &str, enable: bool) -> Result<()> {
    let addon = lookup_addon(name)?;
    let mut settings = ctx.settings()?;
    settings.set(name, serde_json::Value::Bool(enable));
    settings.save()?;

    let manager = ctx.manager();
    if manager.check_running(1).is_ok() {
        let driver = manager.driver()?;
        let channel = driver.channel()?;
        for file in &addon.assets {
            if enable {
                transfer_file(file, channel.as_ref())?;
            } else {
                channel.run(&format!("sudo rm -f {}", file.target_path()))?;
            }
        }
    }

    let verb = if enable { "enabled" } else { "disabled" };
    println!("{name} was successfully {verb}");
    Ok(())
}

fn configure_addon(ctx: &Context, name: &str) -> Result<()> {
    if name != "registry-creds" {
        return Err(Error::Config(format!("{name} has no configuration")));
    }
    lookup_addon(name)?;
    ctx.manager().ensure_running_or_exit(1);

    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stdout();

    let mut data = BTreeMap::new();
    if ask_yes_no(
        &mut input,
        &mut output,
        "\nDo you want to enable AWS Elastic Container Registry?",
        &POSITIVE_RESPONSES,
        &NEGATIVE_RESPONSES,
    )? {
        for (key, question) in [
            ("AWS_ACCESS_KEY_ID", "-- Enter AWS Access Key ID: "),
            ("AWS_SECRET_ACCESS_KEY", "-- Enter AWS Secret Access Key: "),
            ("aws-region", "-- Enter AWS Region: "),
            ("aws-account", "-- Enter 12 digit AWS Account ID: "),
        ] {
            data.insert(key.to_string(), ask_static_value(&mut input, &mut output, question)?);
        }
    } else {
        for key in ["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY", "aws-region", "aws-account"] {
            data.insert(key.to_string(), "changeme".to_string());
        }
    }

    let labels = BTreeMap::from([
        ("app".to_string(), "registry-creds".to_string()),
        ("cloud".to_string(), "ecr".to_string()),
        ("kubernetes.io/minikube-addons".to_string(), "registry-creds".to_string()),
    ]);

    let cluster = KubeClusterApi::new()?;
    retry_after(
        5,
        || create_secret(&cluster, "kube-system", "registry-creds-ecr", &data, &labels),
        Duration::from_secs(2),
    )?;
    println!("registry-creds was successfully configured");
    Ok(())
}
