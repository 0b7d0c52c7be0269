use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        pause_command(),
        unpause_command(),
        skip_command(),
        stop_command(),
        repeat_current_command(),
        norepeat_command(),
        queue_command(),
    ]
}

// Comandos de reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Agrega una canción o playlist a la cola")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "Búsqueda o enlace a una canción o playlist",
            )
            .required(true),
        )
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Muestra la cola de reproducción")
}

// Comandos de control

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pausa la reproducción actual")
}

fn unpause_command() -> CreateCommand {
    CreateCommand::new("unpause").description("Reanuda la reproducción pausada")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip")
        .description("Salta la canción actual")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "count",
                "Cantidad de canciones a saltar",
            )
            .min_int_value(1),
        )
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción y vacía la cola")
}

fn repeat_current_command() -> CreateCommand {
    CreateCommand::new("repeat_current").description("Repite la canción actual")
}

fn norepeat_command() -> CreateCommand {
    CreateCommand::new("norepeat").description("Deja de repetir la canción actual")
}
