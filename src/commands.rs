// src/commands.rs
//! Command handlers for the blockyard CLI

use anyhow::{Context, Result, anyhow};
use blockyard::{CompileTarget, Compiled, Packager};
use std::path::Path;
use tracing::info;

pub fn cmd_install(packager: &mut Packager, path: &Path, force: bool) -> Result<()> {
    info!("Installing {}", path.display());
    match packager
        .add(path, force)
        .with_context(|| format!("Failed to install {}", path.display()))?
    {
        Some(id) => println!("Installed {}", id),
        None => println!("Already installed (use --force to replace)"),
    }
    Ok(())
}

pub fn cmd_remove(packager: &mut Packager, query: &str, package: bool) -> Result<()> {
    let removed = if package {
        packager.remove_package(query)?
    } else {
        packager.componentizer_mut().remove_component(query)?
    };
    if removed.is_empty() {
        println!("Nothing removed: no match, or every match is still included");
    }
    for id in removed {
        println!("Removed {}", id);
    }
    Ok(())
}

pub fn cmd_list(packager: &Packager, components: bool, packages: bool) -> Result<()> {
    let both = !components && !packages;

    if components || both {
        let installed = packager.componentizer().components()?;
        println!("Components ({}):", installed.len());
        for c in installed {
            println!("  {}  {}  [{}]", c.combined_id(), c.component.name, c.component.category);
        }
    }
    if packages || both {
        let installed = packager.packages()?;
        println!("Packages ({}):", installed.len());
        for p in installed {
            println!("  {}  {}  ({} includes)", p.combined_id(), p.name, p.includes.len());
        }
    }
    Ok(())
}

pub fn cmd_show(packager: &mut Packager, query: &str, package: bool, deep: bool) -> Result<()> {
    if package {
        let details = packager
            .get_package(query, false)?
            .ok_or_else(|| anyhow!("No package matches {}", query))?;
        println!("{}", serde_json::to_string_pretty(&details.package)?);
        println!("Includes:");
        for key in packager.get_includes(query, deep)? {
            println!("  {}", key);
        }
    } else {
        let component = packager
            .componentizer_mut()
            .get_component(query, true)?
            .ok_or_else(|| anyhow!("No component matches {}", query))?;
        println!("{}", serde_json::to_string_pretty(&component)?);
    }
    Ok(())
}

pub fn cmd_compatible(packager: &Packager, query: &str) -> Result<()> {
    match packager.componentizer().get_component_compatible_with(query)? {
        Some(component) => println!("{}", component.combined_id()),
        None => println!("No installed version is compatible with {}", query),
    }
    Ok(())
}

pub fn cmd_compile(packager: &Packager, query: &str, package: bool, output: &Path) -> Result<()> {
    let target = CompileTarget::Directory(output);
    let compiled = if package {
        packager.compile_package(query, target)?
    } else {
        packager.componentizer().compile_component(query, target)?
    };
    if let Compiled::Written(path) = compiled {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

pub fn cmd_clean(packager: &mut Packager, co_existing: Option<&str>) -> Result<()> {
    let removed = match co_existing {
        Some(query) => packager.clean_co_existing(query)?,
        None => packager.clean_isolated()?,
    };
    println!("Removed {} units", removed.len());
    for id in removed {
        println!("  {}", id);
    }
    Ok(())
}
