pub mod draw_command;
