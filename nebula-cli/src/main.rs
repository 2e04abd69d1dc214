use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use nebula_core::differ::{create_plan, find_changed_attributes};
use nebula_core::effect::Effect;
use nebula_core::interpreter::{EffectOutcome, Interpreter};
use nebula_core::plan::Plan;
use nebula_core::provider::Provider;
use nebula_core::resource::{Resource, State, Value};
use nebula_core::schema::ResourceSchema;
use nebula_provider_opennebula::schemas::{self, virtual_machine};
use nebula_provider_opennebula::template::compile;
use nebula_provider_opennebula::{OneClient, OneConfig, OpenNebulaProvider, Timeouts, decode};

#[derive(Parser)]
#[command(name = "nebula")]
#[command(about = "Declarative OpenNebula virtual machine management", long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: Connection,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Connection {
    /// XML-RPC endpoint, e.g. http://frontend:2633/RPC2
    #[arg(long, global = true, env = "OPENNEBULA_ENDPOINT")]
    endpoint: Option<String>,

    #[arg(long, global = true, env = "OPENNEBULA_USERNAME")]
    username: Option<String>,

    #[arg(long, global = true, env = "OPENNEBULA_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a VM specification and compile its template
    Validate {
        /// Path to the JSON specification
        file: PathBuf,
    },
    /// Print the compiled template text
    Template {
        /// Path to the JSON specification
        file: PathBuf,
    },
    /// Show execution plan without applying changes
    Plan {
        /// Path to the JSON specification
        file: PathBuf,

        /// Id of the existing VM (looked up by name otherwise)
        #[arg(long)]
        id: Option<i64>,
    },
    /// Apply changes to reach the desired state
    Apply {
        /// Path to the JSON specification
        file: PathBuf,

        /// Id of the existing VM (looked up by name otherwise)
        #[arg(long)]
        id: Option<i64>,

        /// Seconds to wait for a new VM to run
        #[arg(long)]
        create_timeout: Option<u64>,

        /// Seconds to wait for a terminated VM to reach DONE
        #[arg(long)]
        delete_timeout: Option<u64>,
    },
    /// Show the observed attributes of a VM
    Show {
        id: i64,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Terminate a VM and wait until it is gone
    Destroy {
        id: i64,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { file } => run_validate(&file),
        Commands::Template { file } => run_template(&file),
        Commands::Plan { file, id } => run_plan(&cli.connection, &file, id).await,
        Commands::Apply {
            file,
            id,
            create_timeout,
            delete_timeout,
        } => {
            let mut timeouts = Timeouts::default();
            if let Some(secs) = create_timeout {
                timeouts.create = Duration::from_secs(secs);
            }
            if let Some(secs) = delete_timeout {
                timeouts.delete = Duration::from_secs(secs);
            }
            run_apply(&cli.connection, &file, id, timeouts).await
        }
        Commands::Show { id, json } => run_show(&cli.connection, id, json).await,
        Commands::Destroy { id, auto_approve } => {
            run_destroy(&cli.connection, id, auto_approve).await
        }
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

// =============================================================================
// Loading
// =============================================================================

fn json_to_value(json: &serde_json::Value) -> Option<Value> {
    match json {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Some(Value::Int(i)),
            None => n.as_f64().map(Value::Float),
        },
        serde_json::Value::String(s) => Some(Value::String(s.clone())),
        serde_json::Value::Array(items) => {
            Some(Value::List(items.iter().filter_map(json_to_value).collect()))
        }
        serde_json::Value::Object(map) => Some(Value::Map(
            map.iter()
                .filter_map(|(k, v)| json_to_value(v).map(|v| (k.clone(), v)))
                .collect(),
        )),
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Int(n) => serde_json::Value::from(*n),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
    }
}

/// Read a JSON object of VM attributes. The resource is named after the
/// `name` attribute, or the file stem when there is none.
fn load_resource(file: &Path) -> Result<Resource, String> {
    let content = fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| format!("Parse error in {}: {}", file.display(), e))?;

    let attributes = match json_to_value(&json) {
        Some(Value::Map(map)) => map,
        _ => {
            return Err(format!(
                "{}: expected a JSON object of VM attributes",
                file.display()
            ));
        }
    };

    let name = match attributes.get("name") {
        Some(Value::String(name)) => name.clone(),
        _ => file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "vm".to_string()),
    };

    Ok(Resource::new(virtual_machine::RESOURCE_TYPE, name).with_attributes(attributes))
}

fn get_schemas() -> HashMap<String, ResourceSchema> {
    schemas::all_schemas()
        .into_iter()
        .map(|schema| (schema.resource_type.clone(), schema))
        .collect()
}

fn validate_resource(resource: &Resource) -> Result<(), String> {
    let schemas = get_schemas();
    let schema = schemas
        .get(&resource.id.resource_type)
        .ok_or_else(|| format!("Unknown resource type: {}", resource.id.resource_type))?;
    if let Err(errors) = schema.validate(&resource.attributes) {
        let lines: Vec<String> = errors
            .iter()
            .map(|e| format!("{}: {}", resource.id, e))
            .collect();
        return Err(format!("Validation failed:\n  {}", lines.join("\n  ")));
    }
    decode(resource).map_err(|e| format!("{}: {}", resource.id, e))?;
    Ok(())
}

fn load_template(file: &Path) -> Result<(Resource, String), String> {
    let resource = load_resource(file)?;
    validate_resource(&resource)?;
    let spec = decode(&resource).map_err(|e| e.to_string())?;
    let template = compile(&spec).map_err(|e| format!("{}: {}", resource.id, e))?;
    Ok((resource, template))
}

fn connect(
    connection: &Connection,
    timeouts: Timeouts,
) -> Result<OpenNebulaProvider<OneClient>, String> {
    let require = |value: &Option<String>, flag: &str, env: &str| {
        value
            .clone()
            .ok_or_else(|| format!("--{} or {} must be set", flag, env))
    };
    let config = OneConfig::new(
        require(&connection.endpoint, "endpoint", "OPENNEBULA_ENDPOINT")?,
        require(&connection.username, "username", "OPENNEBULA_USERNAME")?,
        require(&connection.password, "password", "OPENNEBULA_PASSWORD")?,
    );
    let client = OneClient::new(config).map_err(|e| e.to_string())?;
    log::debug!("Connecting to {}", client.endpoint());
    Ok(OpenNebulaProvider::new(client).with_timeouts(timeouts))
}

async fn plan_for(
    provider: &OpenNebulaProvider<OneClient>,
    resource: &Resource,
    id: Option<i64>,
) -> Result<Plan, String> {
    let identifier = id.map(|id| id.to_string());
    let current = provider
        .read(&resource.id, identifier.as_deref())
        .await
        .map_err(|e| e.to_string())?;

    let mut states = HashMap::new();
    states.insert(resource.id.clone(), current);
    create_plan(std::slice::from_ref(resource), &states, provider).map_err(|e| e.to_string())
}

// =============================================================================
// Commands
// =============================================================================

fn run_validate(file: &Path) -> Result<(), String> {
    println!("{}", "Validating...".cyan());

    let (resource, template) = load_template(file)?;

    println!(
        "{}",
        format!("✓ {} validated successfully.", resource.id)
            .green()
            .bold()
    );
    println!("  • {} template attributes", template.lines().count());
    Ok(())
}

fn run_template(file: &Path) -> Result<(), String> {
    let (_, template) = load_template(file)?;
    print!("{}", template);
    Ok(())
}

async fn run_plan(connection: &Connection, file: &Path, id: Option<i64>) -> Result<(), String> {
    let resource = load_resource(file)?;
    validate_resource(&resource)?;

    let provider = connect(connection, Timeouts::default())?;
    let plan = plan_for(&provider, &resource, id).await?;
    print_plan(&plan);
    Ok(())
}

async fn run_apply(
    connection: &Connection,
    file: &Path,
    id: Option<i64>,
    timeouts: Timeouts,
) -> Result<(), String> {
    let resource = load_resource(file)?;
    validate_resource(&resource)?;

    let provider = connect(connection, timeouts)?;
    let plan = plan_for(&provider, &resource, id).await?;
    print_plan(&plan);

    if plan.is_empty() {
        return Ok(());
    }

    println!();
    println!("{}", "Applying changes...".cyan().bold());
    println!();

    let result = Interpreter::new(&provider).apply(&plan).await;

    for (effect, outcome) in plan.effects().iter().zip(&result.outcomes) {
        match outcome {
            Ok(outcome) => {
                let vm_id = outcome
                    .state()
                    .and_then(|s| s.identifier.as_deref())
                    .unwrap_or("-");
                let verb = match outcome {
                    EffectOutcome::Created { .. } => "Created",
                    EffectOutcome::Updated { .. } => "Updated",
                    EffectOutcome::Replaced { .. } => "Replaced",
                    EffectOutcome::Deleted => "Deleted",
                    EffectOutcome::Skipped { .. } => "Skipped",
                };
                println!(
                    "  {} {} {} (VM id: {})",
                    "✓".green(),
                    verb,
                    effect.resource_id(),
                    vm_id
                );
            }
            Err(e) => {
                println!("  {} {} - {}", "✗".red(), effect.resource_id(), e);
            }
        }
    }

    println!();
    if result.is_success() {
        println!(
            "{}",
            format!(
                "Apply complete! {} changes applied.",
                result.success_count
            )
            .green()
            .bold()
        );
        Ok(())
    } else {
        Err(format!(
            "Apply failed. {} succeeded, {} failed.",
            result.success_count, result.failure_count
        ))
    }
}

async fn run_show(connection: &Connection, id: i64, json: bool) -> Result<(), String> {
    let provider = connect(connection, Timeouts::default())?;
    let vm = provider
        .read_vm_by_id(id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("VM {} not found", id))?;

    let attributes = vm.to_attributes();
    if json {
        let object: serde_json::Map<String, serde_json::Value> = attributes
            .iter()
            .map(|(k, v)| (k.clone(), value_to_json(v)))
            .collect();
        let text = serde_json::to_string_pretty(&serde_json::Value::Object(object))
            .map_err(|e| e.to_string())?;
        println!("{}", text);
        return Ok(());
    }

    println!("{} {}", "VM".cyan().bold(), id.to_string().cyan().bold());
    for key in sorted_keys(&attributes) {
        println!("    {}: {}", key, attributes[key]);
    }
    Ok(())
}

async fn run_destroy(connection: &Connection, id: i64, auto_approve: bool) -> Result<(), String> {
    let provider = connect(connection, Timeouts::default())?;

    if !auto_approve {
        println!(
            "{}",
            format!("Do you really want to destroy VM {}?", id)
                .yellow()
                .bold()
        );
        println!(
            "  {}",
            "This action cannot be undone. Type 'yes' to confirm.".yellow()
        );
        print!("\n  Enter a value: ");
        std::io::Write::flush(&mut std::io::stdout()).map_err(|e| e.to_string())?;

        let mut input = String::new();
        std::io::stdin()
            .read_line(&mut input)
            .map_err(|e| e.to_string())?;

        if input.trim() != "yes" {
            println!();
            println!("{}", "Destroy cancelled.".yellow());
            return Ok(());
        }
        println!();
    }

    println!("{}", "Destroying...".red().bold());
    provider.delete_vm(id).await.map_err(|e| e.to_string())?;
    println!("  {} VM {}", "✓".green(), id);
    println!();
    println!("{}", "Destroy complete!".green().bold());
    Ok(())
}

// =============================================================================
// Plan display
// =============================================================================

/// Attribute keys with `name` first, the rest alphabetical
fn sorted_keys(attributes: &HashMap<String, Value>) -> Vec<&String> {
    let mut keys: Vec<_> = attributes.keys().filter(|k| !k.starts_with('_')).collect();
    keys.sort_by(|a, b| match (a.as_str(), b.as_str()) {
        ("name", _) => std::cmp::Ordering::Less,
        (_, "name") => std::cmp::Ordering::Greater,
        _ => a.cmp(b),
    });
    keys
}

fn print_changes(from: &State, to: &Resource) {
    let mut changed = find_changed_attributes(&to.attributes, &from.attributes, &virtual_machine::schema());
    changed.sort();

    for key in &changed {
        let old = from
            .attributes
            .get(key)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "(none)".to_string());
        let new = to
            .attributes
            .get(key)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "(none)".to_string());
        println!("      {}: {} → {}", key, old.red(), new.green());
    }

    if changed.is_empty()
        && let Some(lcm) = from.attributes.get("lcmstate")
    {
        println!("      lcmstate: {} → {}", lcm.to_string().red(), "3".green());
    }
}

fn print_plan(plan: &Plan) {
    if plan.is_empty() {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for effect in plan.effects() {
        match effect {
            Effect::Create(r) => {
                println!("  {} {}", "+".green().bold(), r.id.to_string().cyan().bold());
                for key in sorted_keys(&r.attributes) {
                    println!("      {}: {}", key, r.attributes[key].to_string().green());
                }
            }
            Effect::Update { id, from, to } => {
                println!("  {} {}", "~".yellow().bold(), id.to_string().cyan().bold());
                print_changes(from, to);
            }
            Effect::Replace { id, from, to } => {
                let vm_id = from.identifier.as_deref().unwrap_or("-");
                println!(
                    "  {} {} (VM {} will be terminated)",
                    "-/+".magenta().bold(),
                    id.to_string().cyan().bold(),
                    vm_id
                );
                print_changes(from, to);
            }
            Effect::Delete { id, identifier } => {
                println!(
                    "  {} {} (VM {})",
                    "-".red().bold(),
                    id.to_string().cyan().bold(),
                    identifier
                );
            }
        }
    }

    println!();
    println!("{}", plan.summary().to_string().bold());
}
