// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    anyhow::Result,
    clap::{Arg, ArgMatches, Command},
    opkg_client::{
        control::ControlParagraph,
        manager::PackageManager,
        package_version,
        query::{ListOptions, ReverseDependencyQuery, RELATION_FIELDS},
    },
};

const ABOUT: &str = "\
opkg-compatible package manager client.

Reads a legacy opkg.conf, fetches the Packages indexes of the configured
feeds, and answers queries against them and against the local status
database. Archives are downloaded into the cache directory; nothing is
unpacked or installed onto the system.
";

/// Timestamp injected at build time, when the build system provides one.
const BUILD_TIME: Option<&str> = option_env!("OPKG_BUILD_TIME");

pub async fn run() -> Result<()> {
    crate::logging::init_from_env();

    let default_conf: &'static str = Box::leak(default_config_path().into_boxed_str());

    let app = Command::new("opkg")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Interface with opkg package feeds")
        .long_about(ABOUT)
        .arg_required_else_help(true)
        .subcommand_required(true)
        .arg(
            Arg::new("conf")
                .long("conf")
                .takes_value(true)
                .default_value(default_conf)
                .global(true)
                .help("Path to opkg.conf"),
        );

    let app = app.subcommand(Command::new("update").about("Update list of available packages"));

    let app = app.subcommand(Command::new("clean").about("Clean internal cache"));

    let app = app.subcommand(
        Command::new("install")
            .about("Download package(s) into the cache")
            .arg(
                Arg::new("packages")
                    .required(true)
                    .multiple_values(true)
                    .help("Names of packages to install"),
            ),
    );

    let app = app.subcommand(
        Command::new("download")
            .about("Download package(s) to the cache directory")
            .arg(
                Arg::new("packages")
                    .required(true)
                    .multiple_values(true)
                    .help("Names of packages to download"),
            ),
    );

    let app = app.subcommand(
        Command::new("upgrade")
            .about("Fetch newer versions of installed packages")
            .arg(
                Arg::new("patterns")
                    .multiple_values(true)
                    .help("Restrict the upgrade to matching package names"),
            ),
    );

    let app = app.subcommand(list_command(
        "list",
        "List available packages",
    ));
    let app = app.subcommand(list_command(
        "list-installed",
        "List installed packages",
    ));

    let app = app.subcommand(
        Command::new("list-upgradable")
            .about("List installed packages with a newer version available")
            .arg(Arg::new("patterns").multiple_values(true)),
    );

    let app = app.subcommand(paragraph_command(
        "info",
        "Display available package metadata",
    ));
    let app = app.subcommand(paragraph_command(
        "status",
        "Display installed package status",
    ));

    let app = app.subcommand(
        Command::new("find")
            .about("Search packages by name or description substring")
            .arg(
                Arg::new("pattern")
                    .required(true)
                    .multiple_values(true)
                    .help("Substring to search for"),
            ),
    );

    let app = app.subcommand(
        Command::new("compare-versions")
            .about("Compare two version strings")
            .arg(Arg::new("v1").required(true).help("Left-hand version"))
            .arg(
                Arg::new("op")
                    .required(true)
                    .help("Comparison operator: <, <=, =, >=, >, << or >>"),
            )
            .arg(Arg::new("v2").required(true).help("Right-hand version")),
    );

    let app = app.subcommand(
        Command::new("print-architecture").about("List configured architectures"),
    );

    let app = app.subcommand(
        Command::new("depends")
            .about("Show the relationships a package declares")
            .arg(all_flag())
            .arg(
                Arg::new("patterns")
                    .required(true)
                    .multiple_values(true)
                    .help("Package names or globs"),
            ),
    );

    let app = app
        .subcommand(reverse_command(
            "whatdepends",
            "List packages depending on the target",
        ))
        .subcommand(reverse_command(
            "whatdependsrec",
            "Recursively list packages depending on the target",
        ))
        .subcommand(reverse_command(
            "whatrecommends",
            "List packages recommending the target",
        ))
        .subcommand(reverse_command(
            "whatsuggests",
            "List packages suggesting the target",
        ))
        .subcommand(reverse_command(
            "whatprovides",
            "List packages providing the target",
        ))
        .subcommand(reverse_command(
            "whatconflicts",
            "List packages conflicting with the target",
        ))
        .subcommand(reverse_command(
            "whatreplaces",
            "List packages that replace the target",
        ));

    let app = app.subcommand(Command::new("version").about("Print version information"));

    let matches = app.get_matches();
    let conf = matches.value_of("conf").expect("conf has a default value");

    match matches.subcommand() {
        Some(("update", _)) => command_update(conf).await,
        Some(("clean", _)) => command_clean(conf),
        Some(("install", args)) => command_fetch(conf, args).await,
        Some(("download", args)) => command_fetch(conf, args).await,
        Some(("upgrade", args)) => command_upgrade(conf, args).await,
        Some(("list", args)) => command_list(conf, args, false).await,
        Some(("list-installed", args)) => command_list(conf, args, true).await,
        Some(("list-upgradable", args)) => command_list_upgradable(conf, args).await,
        Some(("info", args)) => command_info(conf, args).await,
        Some(("status", args)) => command_status(conf, args),
        Some(("find", args)) => command_find(conf, args).await,
        Some(("compare-versions", args)) => command_compare_versions(args),
        Some(("print-architecture", _)) => command_print_architecture(conf),
        Some(("depends", args)) => command_depends(conf, args).await,
        Some(("whatdepends", args)) => command_reverse(conf, args, "Depends", false).await,
        Some(("whatdependsrec", args)) => command_reverse(conf, args, "Depends", true).await,
        Some(("whatrecommends", args)) => command_reverse(conf, args, "Recommends", false).await,
        Some(("whatsuggests", args)) => command_reverse(conf, args, "Suggests", false).await,
        Some(("whatprovides", args)) => command_reverse(conf, args, "Provides", false).await,
        Some(("whatconflicts", args)) => command_reverse(conf, args, "Conflicts", false).await,
        Some(("whatreplaces", args)) => command_reverse(conf, args, "Replaces", false).await,
        Some(("version", _)) => {
            println!(
                "opkg {} ({})",
                env!("CARGO_PKG_VERSION"),
                BUILD_TIME.unwrap_or("unreleased")
            );
            Ok(())
        }
        _ => unreachable!("subcommand required"),
    }
}

fn list_command(name: &'static str, about: &'static str) -> Command<'static> {
    Command::new(name)
        .about(about)
        .arg(
            Arg::new("short-description")
                .long("short-description")
                .help("Display only the first line of the description"),
        )
        .arg(Arg::new("size").long("size").help("Show package size"))
        .arg(Arg::new("patterns").multiple_values(true).help("Name globs"))
}

fn paragraph_command(name: &'static str, about: &'static str) -> Command<'static> {
    Command::new(name)
        .about(about)
        .arg(
            Arg::new("fields")
                .long("fields")
                .takes_value(true)
                .help("Comma separated list of fields to display"),
        )
        .arg(
            Arg::new("short-description")
                .long("short-description")
                .help("Display only the first line of the description"),
        )
        .arg(Arg::new("patterns").multiple_values(true).help("Name globs"))
}

fn reverse_command(name: &'static str, about: &'static str) -> Command<'static> {
    Command::new(name).about(about).arg(all_flag()).arg(
        Arg::new("patterns")
            .required(true)
            .multiple_values(true)
            .help("Package names or globs"),
    )
}

fn all_flag() -> Arg<'static> {
    Arg::new("all")
        .short('A')
        .long("all")
        .help("Query all packages, not just installed ones")
}

fn default_config_path() -> String {
    std::env::var("OPKG_CONF").unwrap_or_else(|_| "/etc/opkg/opkg.conf".to_string())
}

fn patterns(args: &ArgMatches) -> Vec<String> {
    args.values_of("patterns")
        .map(|values| values.map(String::from).collect())
        .unwrap_or_default()
}

async fn updated_manager(conf: &str) -> Result<PackageManager> {
    let mut manager = PackageManager::new(conf)?;
    manager.update().await?;

    Ok(manager)
}

async fn command_update(conf: &str) -> Result<()> {
    updated_manager(conf).await?;
    println!("Package lists updated.");

    Ok(())
}

fn command_clean(conf: &str) -> Result<()> {
    let manager = PackageManager::new(conf)?;
    manager.clean()?;

    Ok(())
}

async fn command_fetch(conf: &str, args: &ArgMatches) -> Result<()> {
    let manager = updated_manager(conf).await?;

    for name in args.values_of("packages").unwrap_or_default() {
        let destination = manager.download(name).await?;
        println!("{} -> {}", name, destination.display());
    }

    Ok(())
}

async fn command_upgrade(conf: &str, args: &ArgMatches) -> Result<()> {
    let manager = updated_manager(conf).await?;

    let report = manager.upgrade(&patterns(args)).await?;
    for outcome in &report.completed {
        println!(
            "{}: {} -> {} ({})",
            outcome.candidate.name,
            outcome.candidate.installed,
            outcome.candidate.available,
            outcome.destination.display()
        );
    }

    if let Some(failure) = report.failure {
        return Err(failure.into());
    }
    if report.completed.is_empty() {
        println!("No packages to upgrade.");
    }

    Ok(())
}

async fn command_list(conf: &str, args: &ArgMatches, installed_only: bool) -> Result<()> {
    let manager = if installed_only {
        PackageManager::new(conf)?
    } else {
        updated_manager(conf).await?
    };

    let lines = manager.list_packages(&ListOptions {
        installed_only,
        patterns: patterns(args),
        short_description: args.is_present("short-description"),
        include_size: args.is_present("size"),
    })?;

    for line in lines {
        println!("{}", line);
    }

    Ok(())
}

async fn command_list_upgradable(conf: &str, args: &ArgMatches) -> Result<()> {
    let manager = updated_manager(conf).await?;

    for candidate in manager.list_upgradable(&patterns(args))? {
        println!(
            "{} - {} -> {} {}",
            candidate.name, candidate.installed, candidate.available, candidate.description
        );
    }

    Ok(())
}

async fn command_info(conf: &str, args: &ArgMatches) -> Result<()> {
    let manager = updated_manager(conf).await?;

    let mut globs = patterns(args);
    if globs.is_empty() {
        globs.push("*".to_string());
    }

    let fields = split_fields(args.value_of("fields"));
    let short = args.is_present("short-description");

    for (i, paragraph) in manager.info_paragraphs(&globs)?.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("{}", format_paragraph(paragraph, &fields, short));
    }

    Ok(())
}

fn command_status(conf: &str, args: &ArgMatches) -> Result<()> {
    let manager = PackageManager::new(conf)?;

    let fields = split_fields(args.value_of("fields"));
    let short = args.is_present("short-description");

    for (i, paragraph) in manager.glob_status(&patterns(args)).iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("{}", format_paragraph(paragraph, &fields, short));
    }

    Ok(())
}

async fn command_find(conf: &str, args: &ArgMatches) -> Result<()> {
    let manager = updated_manager(conf).await?;

    let needle = args
        .values_of("pattern")
        .unwrap_or_default()
        .collect::<Vec<_>>()
        .join(" ");

    for package in manager.find_packages(&needle)? {
        println!("{} - {}", package.name, first_line(&package.description));
    }

    Ok(())
}

fn command_compare_versions(args: &ArgMatches) -> Result<()> {
    let v1 = args.value_of("v1").expect("v1 is required");
    let op = args.value_of("op").expect("op is required");
    let v2 = args.value_of("v2").expect("v2 is required");

    let holds = package_version::compare_with_operator(v1, op, v2)?;
    println!("{}", holds);

    Ok(())
}

fn command_print_architecture(conf: &str) -> Result<()> {
    let manager = PackageManager::new(conf)?;

    for arch in manager.architectures() {
        if arch.priority != 0 {
            println!("{} {}", arch.name, arch.priority);
        } else {
            println!("{}", arch.name);
        }
    }

    Ok(())
}

async fn command_depends(conf: &str, args: &ArgMatches) -> Result<()> {
    let include_all = args.is_present("all");
    let manager = updated_manager(conf).await?;

    let mut printed = false;
    for paragraph in manager.info_paragraphs(&patterns(args))? {
        let name = match paragraph.field_str("Package") {
            Some(name) if !name.is_empty() => name,
            _ => continue,
        };
        if !include_all && !manager.status().installed(name) {
            continue;
        }

        if printed {
            println!();
        }
        println!("Package: {}", name);
        for field in RELATION_FIELDS {
            if let Some(value) = paragraph.field_str(field) {
                if !value.is_empty() {
                    println!("  {}: {}", field, value);
                }
            }
        }
        printed = true;
    }

    Ok(())
}

async fn command_reverse(
    conf: &str,
    args: &ArgMatches,
    field: &str,
    recursive: bool,
) -> Result<()> {
    let manager = updated_manager(conf).await?;

    let matches = manager.reverse_dependencies(&ReverseDependencyQuery {
        field: field.to_string(),
        patterns: patterns(args),
        include_all: args.is_present("all"),
        recursive,
    })?;

    for name in matches {
        println!("{}", name);
    }

    Ok(())
}

fn split_fields(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(|field| field.trim())
            .filter(|field| !field.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

fn first_line(text: &str) -> &str {
    match text.find('\n') {
        Some(idx) => &text[..idx],
        None => text,
    }
}

/// Render a paragraph for display.
///
/// With no field filter, all fields print in lexicographic order. With a
/// filter, the requested fields print in the requested order using their
/// original-case names. Multi-line values are re-indented the way control
/// files fold them.
fn format_paragraph(paragraph: &ControlParagraph, fields: &[String], short: bool) -> String {
    let mut lines = Vec::new();

    if fields.is_empty() {
        for key in paragraph.sorted_keys() {
            if let Some(value) = paragraph.field_str(key) {
                push_field_line(&mut lines, key, value, short);
            }
        }
    } else {
        for field in fields {
            if let Some(field) = paragraph.field(field) {
                push_field_line(&mut lines, field.name(), field.value(), short);
            }
        }
    }

    lines.join("\n")
}

fn push_field_line(lines: &mut Vec<String>, key: &str, value: &str, short: bool) {
    if value.is_empty() {
        return;
    }

    let value = if short && key.eq_ignore_ascii_case("Description") {
        first_line(value)
    } else {
        value
    };

    lines.push(format!("{}: {}", key, value.replace('\n', "\n ")));
}
