use std::path::PathBuf;

use clap::arg;
use hickory_proto::rr::{Name, RecordType};
use tracing::{error, trace};
use tracing_subscriber::EnvFilter;
use walnut_update::rr::{self, RecordSet, RecordValue, TimeToLive};
use walnut_update::{Client, ClientConfiguration, RecordSetUpdater, ZoneResolver};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), ()> {
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cmd = clap::Command::new("walnut-update")
        .about("Authenticated DNS dynamic updates")
        .arg(
            arg!(--config <PATH> "Client configuration file to use")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .subcommand_required(true)
        .subcommand(
            clap::Command::new("zone")
                .about("Find the zone that owns a name")
                .arg(arg!(<NAME> "Fully qualified record name")),
        )
        .subcommand(
            clap::Command::new("query")
                .about("Read a record set")
                .arg(arg!(<NAME> "Fully qualified record name"))
                .arg(
                    arg!([TYPE] "Record type")
                        .value_parser(clap::value_parser!(RecordType))
                        .default_value("A"),
                ),
        )
        .subcommand(
            clap::Command::new("add")
                .about("Add a record to its record set")
                .arg(arg!(<NAME> "Fully qualified record name"))
                .arg(arg!(<TTL> "Time to live, in seconds").value_parser(clap::value_parser!(u32)))
                .arg(arg!(<TYPE> "Record type").value_parser(clap::value_parser!(RecordType)))
                .arg(arg!(<VALUE>... "Record value in presentation format")),
        )
        .subcommand(
            clap::Command::new("delete")
                .about("Delete a record set")
                .arg(arg!(<NAME> "Fully qualified record name"))
                .arg(arg!(<TYPE> "Record type").value_parser(clap::value_parser!(RecordType))),
        );

    let args = cmd.get_matches();

    if let Err(error) = run(args).await {
        error!("{error}");
        eprintln!("{error}");
        Err(())
    } else {
        Ok(())
    }
}

async fn run(args: clap::ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let configuration = match args.get_one::<PathBuf>("config") {
        Some(path) => ClientConfiguration::from_path(path)?,
        None => ClientConfiguration::default(),
    }
    .with_env()?;

    let client = Client::from_configuration(&configuration)?;
    trace!(?client, "client constructed");

    match args.subcommand() {
        Some(("zone", sub)) => {
            let (zone, name) = ZoneResolver::new(&client).resolve(required(sub, "NAME")?).await?;
            println!("zone: {zone}");
            println!("name: {name}");
        }
        Some(("query", sub)) => {
            let name: Name = required(sub, "NAME")?.parse()?;
            let record_type = sub
                .get_one::<RecordType>("TYPE")
                .copied()
                .unwrap_or(RecordType::A);
            match RecordSetUpdater::new(&client).read(&name, record_type).await? {
                Some(rrset) => {
                    for value in rrset.values() {
                        println!("{}", rrset.encode(value));
                    }
                }
                None => println!("{name} {record_type}: not found"),
            }
        }
        Some(("add", sub)) => {
            let fqdn = required(sub, "NAME")?;
            let ttl = sub.get_one::<u32>("TTL").copied().unwrap_or_default();
            let record_type = sub
                .get_one::<RecordType>("TYPE")
                .copied()
                .ok_or("record type is required")?;
            let value = sub
                .get_many::<String>("VALUE")
                .map(|values| values.cloned().collect::<Vec<_>>().join(" "))
                .unwrap_or_default();

            let (zone, _) = ZoneResolver::new(&client).resolve(fqdn).await?;
            let name: Name = fqdn.parse()?;
            let updater = RecordSetUpdater::new(&client);

            let existing = updater.read(&name, record_type).await?;
            let mut desired = existing
                .clone()
                .unwrap_or_else(|| RecordSet::new(name.clone(), record_type, TimeToLive::ZERO));
            desired.set_ttl(TimeToLive::from_secs(ttl));
            let value = RecordValue::parse(record_type, &value)?;
            println!("{}", rr::encode(&name, desired.ttl(), &value));
            desired.push(value)?;

            match existing {
                Some(existing) => updater.update(&zone, &existing, &desired).await?,
                None => updater.create(&zone, &desired).await?,
            }
        }
        Some(("delete", sub)) => {
            let fqdn = required(sub, "NAME")?;
            let record_type = sub
                .get_one::<RecordType>("TYPE")
                .copied()
                .ok_or("record type is required")?;
            let (zone, _) = ZoneResolver::new(&client).resolve(fqdn).await?;
            let name: Name = fqdn.parse()?;
            RecordSetUpdater::new(&client)
                .delete(&zone, &name, record_type)
                .await?;
        }
        _ => return Err("unknown command".into()),
    }

    Ok(())
}

fn required<'a>(args: &'a clap::ArgMatches, id: &str) -> Result<&'a str, String> {
    args.get_one::<String>(id)
        .map(String::as_str)
        .ok_or_else(|| format!("{id} is required"))
}
