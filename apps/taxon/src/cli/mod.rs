//! # Taxon CLI Module
//!
//! Operator commands over a redb-backed metamodel.
//!
//! ## Available Commands
//!
//! - `init` - Create (or recreate) a database and bootstrap it
//! - `check` - Run the integrity audit
//! - `class-create`, `class-show`, `class-delete` - Class CRUD
//! - `attribute-add`, `attribute-delete` - Attribute edits
//! - `subclasses`, `is-subclass` - Hierarchy queries
//! - `instance-create`, `instance-show`, `instance-move`, `instance-delete` - Object CRUD
//! - `connect` - Link two objects
//! - `can-contain`, `tag`, `rules` - Rule engine queries

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use taxon_core::TaxonError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Taxon - dynamic inventory metamodel
///
/// Define classes at runtime, instantiate objects from them and keep them
/// in a rule-checked containment tree.
#[derive(Parser, Debug)]
#[command(name = "taxon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress informational output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the redb database
    #[arg(short = 'D', long, global = true, default_value = "taxon.db")]
    pub database: PathBuf,

    /// Path to the TOML engine configuration
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a database and bootstrap the core metamodel
    Init {
        /// Delete an existing database first
        #[arg(short, long)]
        force: bool,
    },

    /// Audit the graph for structural damage
    Check,

    /// Define a new class
    ClassCreate {
        /// Class name
        name: String,

        /// Parent class name
        #[arg(short, long, default_value = "InventoryObject")]
        parent: String,

        /// Mark the class abstract
        #[arg(long = "abstract")]
        is_abstract: bool,

        /// Mark the class as still in design
        #[arg(long)]
        in_design: bool,

        /// Display name
        #[arg(long)]
        display_name: Option<String>,

        /// Attribute as name:type[:mandatory] (repeatable)
        #[arg(short, long = "attribute")]
        attributes: Vec<String>,
    },

    /// Show a class with its effective attributes
    ClassShow {
        /// Class name
        name: String,
    },

    /// Delete a class without subclasses or instances
    ClassDelete {
        /// Class name
        name: String,
    },

    /// Add an attribute to a class
    AttributeAdd {
        /// Class name
        class: String,

        /// Attribute as name:type[:mandatory]
        spec: String,
    },

    /// Remove an attribute declared on a class
    AttributeDelete {
        /// Class name
        class: String,

        /// Attribute name
        name: String,
    },

    /// List subclasses of a class
    Subclasses {
        /// Class name
        class: String,

        /// Include abstract classes
        #[arg(short = 'a', long)]
        include_abstract: bool,

        /// Include the class itself
        #[arg(short = 's', long)]
        include_self: bool,

        /// Direct subclasses only
        #[arg(long)]
        direct: bool,
    },

    /// Check whether one class is a subclass of another
    IsSubclass {
        /// Candidate class name
        class: String,

        /// Ancestor class name
        ancestor: String,
    },

    /// Create an object
    InstanceCreate {
        /// Class name
        class: String,

        /// Container object id (defaults to the dummy root)
        #[arg(short, long)]
        parent: Option<u64>,

        /// Attach to the parent as a special child
        #[arg(long, requires = "parent")]
        special: bool,

        /// Attribute value as key=value (repeatable)
        #[arg(short = 's', long = "set")]
        values: Vec<String>,
    },

    /// Show an object
    InstanceShow {
        /// Object id
        id: u64,

        /// Also list contained objects
        #[arg(short, long)]
        children: bool,
    },

    /// Move an object under another container
    InstanceMove {
        /// Object id
        id: u64,

        /// New container id
        parent: u64,
    },

    /// Delete an object
    InstanceDelete {
        /// Object id
        id: u64,

        /// Delete everything it contains as well
        #[arg(short, long)]
        cascade: bool,
    },

    /// Link two objects with an instance of a link class
    Connect {
        /// Source object id
        source: u64,

        /// Target object id
        target: u64,

        /// Link class name
        #[arg(short, long)]
        link: String,
    },

    /// Check whether a class may contain another
    CanContain {
        /// Parent class name
        parent: String,

        /// Child class name
        child: String,

        /// Check special containment instead
        #[arg(long)]
        special: bool,
    },

    /// Resolve the validator tag of a class
    Tag {
        /// Class name
        class: String,
    },

    /// Print the active rule tables
    Rules,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments and return the rendered output.
pub fn execute(cli: Cli) -> Result<String, TaxonError> {
    let json_mode = cli.json_mode;
    let config = load_config(cli.config.as_deref())?;
    let engine = || open_engine(&cli.database, &config);

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&cli.database, &config, json_mode, force),
        Some(Commands::Check) => cmd_check(&engine()?, json_mode),
        Some(Commands::ClassCreate {
            name,
            parent,
            is_abstract,
            in_design,
            display_name,
            attributes,
        }) => cmd_class_create(
            &engine()?,
            json_mode,
            &name,
            &parent,
            is_abstract,
            in_design,
            display_name,
            &attributes,
        ),
        Some(Commands::ClassShow { name }) => cmd_class_show(&engine()?, json_mode, &name),
        Some(Commands::ClassDelete { name }) => cmd_class_delete(&engine()?, json_mode, &name),
        Some(Commands::AttributeAdd { class, spec }) => {
            cmd_attribute_add(&engine()?, json_mode, &class, &spec)
        }
        Some(Commands::AttributeDelete { class, name }) => {
            cmd_attribute_delete(&engine()?, json_mode, &class, &name)
        }
        Some(Commands::Subclasses {
            class,
            include_abstract,
            include_self,
            direct,
        }) => cmd_subclasses(
            &engine()?,
            json_mode,
            &class,
            include_abstract,
            include_self,
            direct,
        ),
        Some(Commands::IsSubclass { class, ancestor }) => {
            cmd_is_subclass(&engine()?, json_mode, &class, &ancestor)
        }
        Some(Commands::InstanceCreate {
            class,
            parent,
            special,
            values,
        }) => cmd_instance_create(&engine()?, json_mode, &class, parent, special, &values),
        Some(Commands::InstanceShow { id, children }) => {
            cmd_instance_show(&engine()?, json_mode, id, children)
        }
        Some(Commands::InstanceMove { id, parent }) => {
            cmd_instance_move(&engine()?, json_mode, id, parent)
        }
        Some(Commands::InstanceDelete { id, cascade }) => {
            cmd_instance_delete(&engine()?, json_mode, id, cascade)
        }
        Some(Commands::Connect {
            source,
            target,
            link,
        }) => cmd_connect(&engine()?, json_mode, source, target, &link),
        Some(Commands::CanContain {
            parent,
            child,
            special,
        }) => cmd_can_contain(&engine()?, json_mode, &parent, &child, special),
        Some(Commands::Tag { class }) => cmd_tag(&engine()?, json_mode, &class),
        Some(Commands::Rules) => cmd_rules(&engine()?, json_mode),
        None => {
            // No subcommand - run the integrity audit by default
            cmd_check(&engine()?, json_mode)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "taxon",
            "class-show",
            "Rack",
            "-D",
            "inventory.db",
            "--json-mode",
        ])
        .expect("parse");
        assert_eq!(cli.database, PathBuf::from("inventory.db"));
        assert!(cli.json_mode);
        assert!(matches!(cli.command, Some(Commands::ClassShow { name }) if name == "Rack"));
    }

    #[test]
    fn parses_repeated_attributes() {
        let cli = Cli::try_parse_from([
            "taxon",
            "class-create",
            "Router",
            "--parent",
            "GenericEquipment",
            "--abstract",
            "-a",
            "serial:string:mandatory",
            "-a",
            "vendor:list:EquipmentVendor",
        ])
        .expect("parse");
        match cli.command {
            Some(Commands::ClassCreate {
                name,
                parent,
                is_abstract,
                attributes,
                ..
            }) => {
                assert_eq!(name, "Router");
                assert_eq!(parent, "GenericEquipment");
                assert!(is_abstract);
                assert_eq!(attributes.len(), 2);
            }
            other => unreachable!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn special_requires_parent() {
        let result = Cli::try_parse_from(["taxon", "instance-create", "OpticalLink", "--special"]);
        assert!(result.is_err());
    }

    #[test]
    fn no_subcommand_is_allowed() {
        let cli = Cli::try_parse_from(["taxon"]).expect("parse");
        assert!(cli.command.is_none());
        assert_eq!(cli.database, PathBuf::from("taxon.db"));
        assert!(cli.config.is_none());
    }
}
