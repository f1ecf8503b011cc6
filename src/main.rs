mod args;

use args::{Args, SubCommand, SubRepoArg};
use clap::Parser;
use env_logger::Env;
use repctl::errors::*;
use repctl::reindex::ReindexOptions;
use repctl::repo::{self, Repository, SubRepository};
use repctl::signing::{OpenPgpSigner, OpenPgpVerifier};
use repctl::storage::{StorageBuilder, StorageOptions, SubRepoKind};
use repctl::{arch, query, search};
use std::fs;
use std::process::ExitCode;

fn sub_repo_kinds(arg: SubRepoArg) -> Vec<SubRepoKind> {
    match arg {
        SubRepoArg::Release => vec![SubRepoKind::Release],
        SubRepoArg::Testing => vec![SubRepoKind::Testing],
        SubRepoArg::All => vec![SubRepoKind::Release, SubRepoKind::Testing],
    }
}

fn open_repository(rep_dir: &std::path::Path) -> Result<Repository> {
    let archs: Vec<&'static arch::ArchInfo> = arch::ARCHES
        .iter()
        .filter(|a| {
            rep_dir.join("release").join(a.dir).is_dir() || rep_dir.join("testing").join(a.dir).is_dir()
        })
        .collect();
    let default_arch = archs.first().copied().unwrap_or_else(|| arch::by_name("x86_64").unwrap());

    let builder = StorageBuilder::new();
    let storage = builder.build(StorageOptions {
        data_dir: rep_dir.to_path_buf(),
        cache_dir: rep_dir.join(".cache"),
        ..Default::default()
    })?;

    let name = rep_dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "repo".to_string());
    let mut repository = Repository::new(&name, default_arch, archs, storage)?;

    if let Ok(secret) = fs::read(rep_dir.join("signing.key")) {
        repository.signer = Some(Box::new(OpenPgpSigner::load(&secret, None)?));
    }
    if let Ok(public) = fs::read(rep_dir.join("signing.pub")) {
        repository.verifier = Some(Box::new(OpenPgpVerifier::load(&public)?));
    }

    Ok(repository)
}

fn run(args: Args) -> Result<()> {
    match args.subcommand {
        SubCommand::Init(cmd) => {
            let builder = StorageBuilder::new();
            let storage = builder.build(StorageOptions {
                data_dir: args.rep_dir.clone(),
                cache_dir: args.rep_dir.join(".cache"),
                ..Default::default()
            })?;
            let arch_names = cmd
                .arch
                .iter()
                .map(|a| arch::by_name_or_tag(a).map(|info| info.name).ok_or_else(|| Error::ArchNotFound(a.clone())))
                .collect::<Result<Vec<&'static str>>>()?;
            storage.init(&sub_repo_kinds(cmd.sub_repo), &arch_names)?;
            println!("initialized {:?}", args.rep_dir);
            Ok(())
        }
        SubCommand::List(cmd) => {
            let repository = open_repository(&args.rep_dir)?;
            for kind in sub_repo_kinds(cmd.sub_repo) {
                let sub = repository.sub_repo(kind);
                let stack = sub.list(&repository.ctx(), cmd.filter.as_deref().unwrap_or(""), cmd.show_all)?;
                print_stack(&stack);
            }
            Ok(())
        }
        SubCommand::Find(cmd) => {
            let repository = open_repository(&args.rep_dir)?;
            let term_refs: Vec<&str> = cmd.terms.iter().map(String::as_str).collect();
            let Some(request) = query::parse(&term_refs)? else {
                println!("(empty query)");
                return Ok(());
            };
            for kind in sub_repo_kinds(cmd.sub_repo) {
                let sub = repository.sub_repo(kind);
                let stack = sub.find(&repository.ctx(), &request)?;
                print_stack(&stack);
            }
            Ok(())
        }
        SubCommand::WhichSource(cmd) => {
            let repository = open_repository(&args.rep_dir)?;
            let sub = SubRepository::new(single_sub_repo_kind(cmd.sub_repo));
            let terms = [format!("n:{}", cmd.name)];
            let term_refs: Vec<&str> = terms.iter().map(String::as_str).collect();
            if let Some(request) = query::parse(&term_refs)? {
                let stack = sub.find(&repository.ctx(), &request)?;
                for bundle in &stack.bundles {
                    println!("{}", bundle.source_rpm);
                }
            }
            Ok(())
        }
        SubCommand::Info(cmd) => {
            let repository = open_repository(&args.rep_dir)?;
            let arch = arch::by_name_or_tag(&cmd.arch).ok_or_else(|| Error::ArchNotFound(cmd.arch.clone()))?;
            let sub = SubRepository::new(single_sub_repo_kind(cmd.sub_repo));
            match sub.info(&repository.ctx(), &cmd.name, arch)? {
                Some((package, info)) => print_info(&package, &info),
                None => return Err(Error::PackageNotFound(cmd.name)),
            }
            Ok(())
        }
        SubCommand::Payload(cmd) => {
            let repository = open_repository(&args.rep_dir)?;
            let arch = arch::by_name_or_tag(&cmd.arch).ok_or_else(|| Error::ArchNotFound(cmd.arch.clone()))?;
            let sub = SubRepository::new(single_sub_repo_kind(cmd.sub_repo));
            match sub.info(&repository.ctx(), &cmd.name, arch)? {
                Some((_, info)) => {
                    for f in &info.files {
                        println!("{f}");
                    }
                    Ok(())
                }
                None => Err(Error::PackageNotFound(cmd.name)),
            }
        }
        SubCommand::Sign(cmd) => {
            let repository = open_repository(&args.rep_dir)?;
            let data = fs::read(&cmd.path)?;
            let sig = repository.sign_detached(&data)?;
            print!("{}", String::from_utf8_lossy(&sig));
            Ok(())
        }
        SubCommand::Add(cmd) => {
            let repository = open_repository(&args.rep_dir)?;
            let sub = SubRepository::new(single_sub_repo_kind(cmd.sub_repo));
            let signature = cmd.signature.as_ref().map(fs::read).transpose()?;
            sub.add_package(&repository.ctx(), &cmd.rpm, signature.as_deref())?;
            if cmd.move_after_add {
                fs::remove_file(&cmd.rpm)?;
            }
            Ok(())
        }
        SubCommand::Remove(cmd) => {
            let repository = open_repository(&args.rep_dir)?;
            let arch = arch::by_name_or_tag(&cmd.arch).ok_or_else(|| Error::ArchNotFound(cmd.arch.clone()))?;
            let sub = SubRepository::new(single_sub_repo_kind(cmd.sub_repo));
            sub.remove_package(&repository.ctx(), arch, &cmd.relative_path)
        }
        SubCommand::Release(cmd) => {
            let repository = open_repository(&args.rep_dir)?;
            let arch = arch::by_name_or_tag(&cmd.arch).ok_or_else(|| Error::ArchNotFound(cmd.arch.clone()))?;
            let ctx = repository.ctx();
            repo::SubRepository::copy_package(&ctx, &ctx, SubRepoKind::Testing, SubRepoKind::Release, arch, &cmd.relative_path)
        }
        SubCommand::Unrelease(cmd) => {
            let repository = open_repository(&args.rep_dir)?;
            let arch = arch::by_name_or_tag(&cmd.arch).ok_or_else(|| Error::ArchNotFound(cmd.arch.clone()))?;
            let ctx = repository.ctx();
            repo::SubRepository::copy_package(&ctx, &ctx, SubRepoKind::Release, SubRepoKind::Testing, arch, &cmd.relative_path)
        }
        SubCommand::Reindex(cmd) => {
            let repository = open_repository(&args.rep_dir)?;
            let opts = ReindexOptions::default();
            let archs: Vec<&'static arch::ArchInfo> = repository
                .archs
                .iter()
                .copied()
                .filter(|a| !cmd.no_source || a.class != arch::ArchClass::Src)
                .collect();
            let ctx = repo::RepoContext { storage: &repository.storage, archs: &archs, verifier: None, split_files: repository.split_files };
            for kind in sub_repo_kinds(cmd.sub_repo) {
                let sub = repository.sub_repo(kind);
                let rx = sub.reindex(&ctx, &opts, cmd.full_reindex)?;
                for arch_name in rx {
                    println!("reindexed {kind}/{arch_name}");
                }
            }
            Ok(())
        }
        SubCommand::PurgeCache(cmd) => {
            let repository = open_repository(&args.rep_dir)?;
            for kind in sub_repo_kinds(cmd.sub_repo) {
                let sub = repository.sub_repo(kind);
                for arch in &repository.archs {
                    let mut depot = repository.storage.depot(kind, arch);
                    depot.purge_cache()?;
                }
                let _ = sub;
            }
            Ok(())
        }
        SubCommand::Stats(cmd) => {
            let repository = open_repository(&args.rep_dir)?;
            for kind in sub_repo_kinds(cmd.sub_repo) {
                let sub = repository.sub_repo(kind);
                let stats = sub.stats(&repository.ctx())?;
                println!("{kind}:");
                for (arch_name, arch_stats) in &stats.per_arch {
                    println!("  {arch_name}: {} packages, {} bytes", arch_stats.count, arch_stats.total_size);
                }
                if cmd.show_status {
                    println!("  updated: {:?}", stats.updated);
                }
            }
            Ok(())
        }
    }
}

fn single_sub_repo_kind(arg: SubRepoArg) -> SubRepoKind {
    match arg {
        SubRepoArg::Testing => SubRepoKind::Testing,
        _ => SubRepoKind::Release,
    }
}

fn print_stack(stack: &search::PackageStack) {
    for bundle in &stack.bundles {
        for package in &bundle.packages {
            println!("{}-{}-{}", package.name, package.version, package.release);
        }
    }
}

fn print_info(package: &search::Package, info: &repo::PackageInfo) {
    println!("name: {}", package.name);
    println!("version: {}-{}", package.version, package.release);
    println!("summary: {}", info.summary);
    println!("license: {}", info.license);
    for dep in &info.requires {
        println!("requires: {} {}", dep.name, dep.flag);
    }
    for entry in &info.changelog {
        println!("* {} {}", entry.date, entry.author);
        println!("{}", entry.text);
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = match args.verbose {
        0 => "repctl=info",
        1 => "info,repctl=debug",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
