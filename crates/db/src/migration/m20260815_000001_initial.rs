//! Initial schema: credentials, files, fragments, thumbnails.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(INITIAL_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(
            "DROP TABLE IF EXISTS thumbnails, fragments, files, credentials CASCADE;",
        )
        .await?;
        Ok(())
    }
}

const INITIAL_SQL: &str = r"
-- Credentials: bot tokens and webhooks that author platform messages
CREATE TABLE credentials (
    id UUID PRIMARY KEY,
    owner_id UUID NOT NULL,
    kind VARCHAR(16) NOT NULL,
    token TEXT,
    url TEXT,
    enabled BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_credential_kind CHECK (kind IN ('bot', 'webhook')),
    CONSTRAINT chk_credential_secret CHECK (
        (kind = 'bot' AND token IS NOT NULL) OR (kind = 'webhook' AND url IS NOT NULL)
    )
);

-- Index for an owner's enabled credentials (pool seeding)
CREATE INDEX idx_credentials_owner ON credentials(owner_id) WHERE enabled;

-- Logical files, independent of how they are chunked
CREATE TABLE files (
    id UUID PRIMARY KEY,
    owner_id UUID NOT NULL,
    name TEXT NOT NULL,
    mime_type VARCHAR(255) NOT NULL,
    kind VARCHAR(16) NOT NULL,
    size BIGINT NOT NULL,
    crc BIGINT,
    encryption VARCHAR(16) NOT NULL,
    enc_key BYTEA,
    enc_iv BYTEA,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_file_size CHECK (size >= 0),
    CONSTRAINT chk_file_kind CHECK (kind IN ('text', 'image', 'audio', 'video', 'other')),
    CONSTRAINT chk_file_encryption CHECK (encryption IN ('none', 'aes_ctr', 'cha_cha20')),
    CONSTRAINT chk_file_key_material CHECK (
        (encryption = 'none') OR (enc_key IS NOT NULL AND enc_iv IS NOT NULL)
    )
);

CREATE INDEX idx_files_owner ON files(owner_id, created_at DESC);

-- Fragments: one chunk of a file stored as one attachment on one message
CREATE TABLE fragments (
    id UUID PRIMARY KEY,
    file_id UUID NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    sequence INTEGER NOT NULL,
    byte_offset BIGINT NOT NULL,
    size BIGINT NOT NULL,
    channel_id VARCHAR(32) NOT NULL,
    message_id VARCHAR(32) NOT NULL,
    attachment_id VARCHAR(32) NOT NULL,
    author_id UUID NOT NULL REFERENCES credentials(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_fragment_sequence CHECK (sequence >= 1),
    CONSTRAINT chk_fragment_offset CHECK (byte_offset >= 0),
    CONSTRAINT chk_fragment_size CHECK (size > 0),
    -- Sequence and offset are each unique within a file
    CONSTRAINT uq_fragment_sequence UNIQUE (file_id, sequence),
    CONSTRAINT uq_fragment_offset UNIQUE (file_id, byte_offset),
    -- An attachment appears at most once across all placements
    CONSTRAINT uq_fragment_attachment UNIQUE (message_id, attachment_id)
);

CREATE INDEX idx_fragments_file ON fragments(file_id, sequence);
CREATE INDEX idx_fragments_message ON fragments(message_id);

-- Thumbnails: auxiliary placements sharing the fragment placement shape
CREATE TABLE thumbnails (
    id UUID PRIMARY KEY,
    file_id UUID NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    size BIGINT NOT NULL,
    channel_id VARCHAR(32) NOT NULL,
    message_id VARCHAR(32) NOT NULL,
    attachment_id VARCHAR(32) NOT NULL,
    author_id UUID NOT NULL REFERENCES credentials(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT uq_thumbnail_attachment UNIQUE (message_id, attachment_id)
);

CREATE INDEX idx_thumbnails_file ON thumbnails(file_id);
CREATE INDEX idx_thumbnails_message ON thumbnails(message_id);
";
