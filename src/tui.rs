//! Utilities for terminal output during scanning.

/// Terminal User Interface Module for netsweep
/// Defines macros to use
#[macro_export]
macro_rules! warning {
    ($name:expr) => {
        println!("{} {}", colored::Colorize::bold(colored::Colorize::red("[!]")), $name);
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        // if not greppable then print, otherwise no else statement so do not print.
        if !$greppable {
            if $accessible {
                // Don't print the ascii art
                println!("{}", $name);
            } else {
                println!(
                    "{} {}",
                    colored::Colorize::bold(colored::Colorize::red("[!]")),
                    $name
                );
            }
        }
    };
}

/// Prints an informational line unless greppable output is requested.
#[macro_export]
macro_rules! detail {
    ($name:expr) => {
        println!("{} {}", colored::Colorize::bold(colored::Colorize::blue("[~]")), $name);
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!(
                    "{} {}",
                    colored::Colorize::bold(colored::Colorize::blue("[~]")),
                    $name
                );
            }
        }
    };
}

/// Prints a result line, bare in greppable or accessible mode.
#[macro_export]
macro_rules! output {
    ($name:expr) => {
        println!(
            "{} {}",
            colored::Colorize::bold(colored::Colorize::green("[>]")),
            $name
        );
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        // greppable output only carries the bare line
        if $greppable || $accessible {
            println!("{}", $name);
        } else {
            println!(
                "{} {}",
                colored::Colorize::bold(colored::Colorize::green("[>]")),
                $name
            );
        }
    };
}
