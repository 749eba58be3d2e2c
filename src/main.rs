//! The passbook command-line client.
//!
//! Every subcommand opens the database file, authenticates the acting user
//! where required, runs the relevant policy check, and calls into the
//! library with one explicit connection. Domain errors are shown to the user
//! verbatim; unexpected storage errors are logged and replaced with a
//! generic notice.

use std::fs::OpenOptions;
use std::process::exit;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rusqlite::Connection;
use tracing_subscriber::{Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use passbook::{
    Actor, Error, PasswordHash, Role, TransactionKind, UserId, account, auth::authenticate, db,
    policy, tables, transaction, user,
};

/// A small personal-banking record-keeper.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the passbook SQLite database.
    #[arg(long)]
    db_path: String,

    /// The id of the acting user; required by every command except `init`
    /// and `register`.
    #[arg(long)]
    user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database schema, optionally seeding an administrator.
    Init {
        /// Seed an admin user with this id (prompts for a password).
        #[arg(long)]
        admin_id: Option<String>,

        /// The display name for the seeded admin.
        #[arg(long, default_value = "Administrator", requires = "admin_id")]
        admin_name: String,
    },

    /// Register a new client user (prompts for a password).
    Register {
        /// The new user's external id, e.g. a national ID.
        id: String,
        /// The new user's display name.
        name: String,
    },

    /// Deposit an amount into an account you own.
    Deposit {
        /// The account to deposit into.
        account_id: i64,
        /// The amount to deposit.
        amount: f64,
    },

    /// Withdraw an amount from an account you own.
    Withdraw {
        /// The account to withdraw from.
        account_id: i64,
        /// The amount to withdraw.
        amount: f64,
    },

    /// Undo a ledger transaction, reversing its balance effect (admin only).
    Undo {
        /// The transaction to undo.
        transaction_id: i64,
    },

    /// Correct a transaction's amount and/or kind, reconciling the balance
    /// (admin only).
    Correct {
        /// The transaction to correct.
        transaction_id: i64,
        /// The corrected amount.
        #[arg(long)]
        amount: Option<f64>,
        /// The corrected kind: "deposit" or "withdrawal".
        #[arg(long)]
        kind: Option<TransactionKind>,
    },

    /// Open an account for a user (admin only).
    OpenAccount {
        /// The id of the owning user.
        owner: String,
        /// The opening balance.
        balance: f64,
        /// A label such as "savings" or "checking".
        #[arg(default_value = "savings")]
        kind: String,
    },

    /// Overwrite an account balance directly, bypassing the ledger
    /// (admin only).
    SetBalance {
        /// The account to overwrite.
        account_id: i64,
        /// The new balance.
        balance: f64,
    },

    /// Close an account you own (admins may close any account).
    CloseAccount {
        /// The account to close.
        account_id: i64,
    },

    /// Delete a user and everything they own (admin only).
    DeleteUser {
        /// The id of the user to delete.
        target: String,
    },

    /// Change a user's display name (admin only).
    RenameUser {
        /// The id of the user to rename.
        target: String,
        /// The new display name.
        new_name: String,
    },

    /// Update your own display name and/or password.
    Profile {
        /// A new display name.
        #[arg(long)]
        name: Option<String>,
        /// Prompt for a new password.
        #[arg(long)]
        change_password: bool,
    },

    /// Print the rows of a table; non-admins see only their own rows.
    Show {
        /// The table to print: "user", "account", or "transaction".
        table: tables::TableName,
        /// Print the rows as JSON instead of plain text.
        #[arg(long)]
        json: bool,
    },

    /// Print the transactions on your accounts (admins may pass --of).
    Statement {
        /// Print another user's statement instead (admin only).
        #[arg(long)]
        of: Option<String>,
    },
}

fn main() {
    setup_logging();

    let args = Args::parse();

    if let Err(error) = run(&args) {
        report(error);
        exit(1);
    }
}

fn run(args: &Args) -> Result<(), Error> {
    let connection = db::open(&args.db_path)?;

    match &args.command {
        Command::Init {
            admin_id,
            admin_name,
        } => init(&connection, admin_id.as_deref(), admin_name),
        Command::Register { id, name } => register(&connection, id, name),
        command => {
            let actor = log_in(&connection, args.user.as_deref())?;
            run_authenticated(&connection, &actor, command)
        }
    }
}

fn run_authenticated(
    connection: &Connection,
    actor: &Actor,
    command: &Command,
) -> Result<(), Error> {
    match command {
        Command::Init { .. } | Command::Register { .. } => unreachable!("handled in run"),
        Command::Deposit { account_id, amount } => {
            let balance = transaction::insert_transaction(
                connection,
                *account_id,
                *amount,
                TransactionKind::Deposit,
                &actor.user_id,
            )?;
            println!("Deposited {amount}. The new balance is {balance}.");
            Ok(())
        }
        Command::Withdraw { account_id, amount } => {
            let balance = transaction::insert_transaction(
                connection,
                *account_id,
                *amount,
                TransactionKind::Withdrawal,
                &actor.user_id,
            )?;
            println!("Withdrew {amount}. The new balance is {balance}.");
            Ok(())
        }
        Command::Undo { transaction_id } => {
            policy::require_admin(actor)?;
            let balance = transaction::delete_transaction(connection, *transaction_id)?;
            println!("Transaction {transaction_id} undone. The balance is now {balance}.");
            Ok(())
        }
        Command::Correct {
            transaction_id,
            amount,
            kind,
        } => {
            policy::require_admin(actor)?;
            let balance =
                transaction::update_transaction(connection, *transaction_id, *amount, *kind)?;
            println!("Transaction {transaction_id} corrected. The balance is now {balance}.");
            Ok(())
        }
        Command::OpenAccount {
            owner,
            balance,
            kind,
        } => {
            policy::require_admin(actor)?;
            let account =
                account::create_account(connection, &UserId::new(owner.clone()), *balance, kind)?;
            println!("Opened {kind} account {} for user {owner}.", account.id);
            Ok(())
        }
        Command::SetBalance {
            account_id,
            balance,
        } => {
            policy::require_admin(actor)?;
            account::set_account_balance(connection, *account_id, *balance)?;
            tracing::warn!(
                "balance of account {account_id} overridden to {balance} by {}, bypassing the ledger",
                actor.user_id
            );
            println!("Account {account_id} balance set to {balance}.");
            Ok(())
        }
        Command::CloseAccount { account_id } => {
            account::delete_account(connection, *account_id, actor)?;
            println!("Account {account_id} closed.");
            Ok(())
        }
        Command::DeleteUser { target } => {
            policy::require_admin(actor)?;
            user::delete_user(connection, &UserId::new(target.clone()))?;
            println!("User {target} and all their records deleted.");
            Ok(())
        }
        Command::RenameUser { target, new_name } => {
            policy::require_admin(actor)?;
            user::update_user_name(connection, &UserId::new(target.clone()), new_name)?;
            println!("User {target} renamed to {new_name}.");
            Ok(())
        }
        Command::Profile {
            name,
            change_password,
        } => {
            let new_hash = if *change_password {
                Some(prompt_new_password()?)
            } else {
                None
            };
            user::update_user_profile(connection, &actor.user_id, name.as_deref(), new_hash)?;
            println!("Profile updated.");
            Ok(())
        }
        Command::Show { table, json } => {
            let scope = policy::table_scope(actor, *table)?;
            let data = tables::get_table_data(connection, *table, scope)?;
            print_table(&data, *json);
            Ok(())
        }
        Command::Statement { of } => {
            let subject = match of {
                Some(target) => {
                    let target = UserId::new(target.clone());
                    policy::require_owner_or_admin(actor, &target)?;
                    target
                }
                None => actor.user_id.clone(),
            };
            let entries = transaction::transactions_for_user(connection, &subject)?;
            if entries.is_empty() {
                println!("No transactions.");
            }
            for entry in entries {
                println!(
                    "#{} account {}: {} {} (by {})",
                    entry.id, entry.account_id, entry.kind, entry.amount, entry.user_id
                );
            }
            Ok(())
        }
    }
}

fn init(connection: &Connection, admin_id: Option<&str>, admin_name: &str) -> Result<(), Error> {
    db::initialize(connection)?;
    println!("Database initialized.");

    if let Some(admin_id) = admin_id {
        let password_hash = prompt_new_password()?;
        user::register_user(
            connection,
            &UserId::new(admin_id),
            admin_name,
            password_hash,
            Role::Admin,
        )?;
        println!("Admin user {admin_id} created.");
    }

    Ok(())
}

fn register(connection: &Connection, id: &str, name: &str) -> Result<(), Error> {
    let password_hash = prompt_new_password()?;

    user::register_user(
        connection,
        &UserId::new(id),
        name,
        password_hash,
        Role::Client,
    )?;
    println!("Registered user {id}. You can now log in.");

    Ok(())
}

/// Authenticate the acting user, prompting for their password.
fn log_in(connection: &Connection, user: Option<&str>) -> Result<Actor, Error> {
    let Some(user) = user else {
        eprintln!("This command needs an acting user; pass --user <ID>.");
        exit(2);
    };

    let password = prompt(&format!("Password for {user}: "));

    authenticate(connection, &UserId::new(user), &password)
}

/// Prompt for a new password twice and hash it.
fn prompt_new_password() -> Result<PasswordHash, Error> {
    let password = prompt("New password: ");
    let confirmation = prompt("Confirm new password: ");

    if password != confirmation {
        eprintln!("The passwords do not match.");
        exit(2);
    }

    PasswordHash::from_raw_password(&password, PasswordHash::DEFAULT_COST)
}

fn prompt(label: &str) -> String {
    match rpassword::prompt_password(label) {
        Ok(text) => text,
        Err(error) => {
            eprintln!("Could not read from the terminal: {error}");
            exit(2);
        }
    }
}

fn print_table(data: &tables::TableData, json: bool) {
    if json {
        match serde_json::to_string_pretty(&data.rows) {
            Ok(text) => println!("{text}"),
            Err(error) => tracing::error!("could not serialize table rows: {error}"),
        }
        return;
    }

    println!("{}", data.columns.join(" | "));
    for row in &data.rows {
        let cells: Vec<String> = data
            .columns
            .iter()
            .map(|column| match row.get(column) {
                Some(serde_json::Value::String(text)) => text.clone(),
                Some(value) => value.to_string(),
                None => String::new(),
            })
            .collect();
        println!("{}", cells.join(" | "));
    }
}

/// Show domain errors verbatim; log unexpected ones and show a generic
/// notice instead.
fn report(error: Error) {
    match error {
        Error::SqlError(_) | Error::HashingError(_) => {
            tracing::error!("unexpected failure: {error}");
            eprintln!("Something went wrong; check debug.log for details.");
        }
        error => eprintln!("{error}"),
    }
}

fn setup_logging() {
    let stdout_log = tracing_subscriber::fmt::layer().pretty();

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("Could not create log file");

    let debug_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(Arc::new(log_file));

    tracing_subscriber::registry()
        .with(
            stdout_log
                .with_filter(filter::LevelFilter::WARN)
                .and_then(debug_log)
                .with_filter(filter::LevelFilter::DEBUG),
        )
        .init();
}
