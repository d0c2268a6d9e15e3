use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::{
    errors::{ControlError, ControlResult},
    ids::{CallId, RepeaterId, TalkgroupId, UserId},
    model::{Call, Repeater, Talkgroup, User},
};

/// sqlx's bare errors don't say which query failed; tag each call site the
/// way the teacher's `anyhow::Context` does, without pulling anyhow into a
/// crate whose public error type is a plain `thiserror` enum.
trait QueryContext<T> {
    fn context(self, what: &'static str) -> ControlResult<T>;
}

impl<T> QueryContext<T> for Result<T, sqlx::Error> {
    fn context(self, what: &'static str) -> ControlResult<T> {
        self.map_err(|e| {
            tracing::debug!(query = what, error = %e, "query failed");
            ControlError::Database(e)
        })
    }
}

/// Repeater / User / Talkgroup / Call persistence. Most of a `Repeater`'s
/// and `User`'s fields are, in a full deployment, populated and edited by
/// the external admin API; this trait models what the routing core itself
/// reads and writes (routing attributes, dynamic talkgroups, call rows).
#[async_trait]
pub trait ControlRepo: Send + Sync {
    async fn get_repeater(&self, id: RepeaterId) -> ControlResult<Option<Repeater>>;
    async fn upsert_repeater(&self, r: &Repeater) -> ControlResult<()>;
    async fn set_dynamic_talkgroup(&self, id: RepeaterId, slot: bool, tg: Option<TalkgroupId>) -> ControlResult<()>;
    async fn delete_session_fields(&self, id: RepeaterId) -> ControlResult<()>;

    async fn get_user(&self, id: UserId) -> ControlResult<Option<User>>;
    async fn get_talkgroup(&self, id: TalkgroupId) -> ControlResult<Option<Talkgroup>>;
    async fn repeaters_owned_by(&self, user: UserId) -> ControlResult<Vec<RepeaterId>>;

    async fn create_call(&self, call: &Call) -> ControlResult<()>;
    async fn update_call(&self, call: &Call) -> ControlResult<()>;
    async fn delete_call(&self, id: CallId) -> ControlResult<()>;
    /// Most recent call placed by this user, across all repeaters
    /// (`userID DESC LIMIT 1` in wall-clock terms — most recent `start_time`).
    async fn last_call_for_user(&self, user: UserId) -> ControlResult<Option<Call>>;
}

#[derive(Clone)]
pub struct PgControlRepo {
    pool: PgPool,
}

impl PgControlRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn static_talkgroups(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        repeater: RepeaterId,
        slot: bool,
    ) -> ControlResult<Vec<TalkgroupId>> {
        let rows = sqlx::query(
            r#"
            SELECT talkgroup_id FROM repeater_static_talkgroups
            WHERE repeater_id = $1 AND slot = $2
            ORDER BY talkgroup_id ASC
            "#,
        )
        .bind(repeater.0 as i64)
        .bind(slot)
        .fetch_all(&mut **tx)
        .await
        .context("list static talkgroups")?;

        Ok(rows.into_iter().map(|r| TalkgroupId(r.get::<i64, _>("talkgroup_id") as u32)).collect())
    }
}

#[async_trait]
impl ControlRepo for PgControlRepo {
    async fn get_repeater(&self, id: RepeaterId) -> ControlResult<Option<Repeater>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, owner_id, callsign, rx_freq, tx_freq, tx_power, color_code,
                   latitude, longitude, height, location, description, slots, url,
                   software_id, package_id, password_hash,
                   ts1_dynamic_talkgroup, ts2_dynamic_talkgroup, hotspot,
                   created_at, updated_at
            FROM repeaters WHERE id = $1
            "#,
        )
        .bind(id.0 as i64)
        .fetch_optional(&mut *tx)
        .await
        .context("get repeater")?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let ts1_static = self.static_talkgroups(&mut tx, id, false).await?;
        let ts2_static = self.static_talkgroups(&mut tx, id, true).await?;
        tx.commit().await?;

        Ok(Some(Repeater {
            id: RepeaterId(row.get::<i64, _>("id") as u32),
            owner_id: UserId(row.get::<i64, _>("owner_id") as u32),
            callsign: row.get("callsign"),
            rx_freq: row.get("rx_freq"),
            tx_freq: row.get("tx_freq"),
            tx_power: row.get::<i16, _>("tx_power") as u8,
            color_code: row.get::<i16, _>("color_code") as u8,
            latitude: row.get("latitude"),
            longitude: row.get("longitude"),
            height: row.get::<i32, _>("height") as u16,
            location: row.get("location"),
            description: row.get("description"),
            slots: row.get::<i16, _>("slots") as u8,
            url: row.get("url"),
            software_id: row.get("software_id"),
            package_id: row.get("package_id"),
            password_hash: row.get("password_hash"),
            ts1_static_talkgroups: ts1_static,
            ts2_static_talkgroups: ts2_static,
            ts1_dynamic_talkgroup: row.get::<Option<i64>, _>("ts1_dynamic_talkgroup").map(|v| TalkgroupId(v as u32)),
            ts2_dynamic_talkgroup: row.get::<Option<i64>, _>("ts2_dynamic_talkgroup").map(|v| TalkgroupId(v as u32)),
            hotspot: row.get("hotspot"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
        }))
    }

    async fn upsert_repeater(&self, r: &Repeater) -> ControlResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO repeaters (
                id, owner_id, callsign, rx_freq, tx_freq, tx_power, color_code,
                latitude, longitude, height, location, description, slots, url,
                software_id, package_id, password_hash,
                ts1_dynamic_talkgroup, ts2_dynamic_talkgroup, hotspot, created_at, updated_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,NOW(),NOW())
            ON CONFLICT (id) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                callsign = EXCLUDED.callsign,
                rx_freq = EXCLUDED.rx_freq,
                tx_freq = EXCLUDED.tx_freq,
                tx_power = EXCLUDED.tx_power,
                color_code = EXCLUDED.color_code,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                height = EXCLUDED.height,
                location = EXCLUDED.location,
                description = EXCLUDED.description,
                slots = EXCLUDED.slots,
                url = EXCLUDED.url,
                software_id = EXCLUDED.software_id,
                package_id = EXCLUDED.package_id,
                password_hash = EXCLUDED.password_hash,
                hotspot = EXCLUDED.hotspot,
                updated_at = NOW()
            "#,
        )
        .bind(r.id.0 as i64)
        .bind(r.owner_id.0 as i64)
        .bind(&r.callsign)
        .bind(&r.rx_freq)
        .bind(&r.tx_freq)
        .bind(r.tx_power as i16)
        .bind(r.color_code as i16)
        .bind(r.latitude)
        .bind(r.longitude)
        .bind(r.height as i32)
        .bind(&r.location)
        .bind(&r.description)
        .bind(r.slots as i16)
        .bind(&r.url)
        .bind(&r.software_id)
        .bind(&r.package_id)
        .bind(&r.password_hash)
        .bind(r.ts1_dynamic_talkgroup.map(|t| t.0 as i64))
        .bind(r.ts2_dynamic_talkgroup.map(|t| t.0 as i64))
        .bind(r.hotspot)
        .execute(&mut *tx)
        .await
        .context("upsert repeater")?;

        sqlx::query("DELETE FROM repeater_static_talkgroups WHERE repeater_id = $1")
            .bind(r.id.0 as i64)
            .execute(&mut *tx)
            .await
            .context("clear static talkgroups")?;

        for (slot, tgs) in [(false, &r.ts1_static_talkgroups), (true, &r.ts2_static_talkgroups)] {
            for tg in tgs {
                sqlx::query(
                    "INSERT INTO repeater_static_talkgroups (repeater_id, slot, talkgroup_id) VALUES ($1, $2, $3)",
                )
                .bind(r.id.0 as i64)
                .bind(slot)
                .bind(tg.0 as i64)
                .execute(&mut *tx)
                .await
                .context("insert static talkgroup")?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_dynamic_talkgroup(&self, id: RepeaterId, slot: bool, tg: Option<TalkgroupId>) -> ControlResult<()> {
        let column = if slot { "ts2_dynamic_talkgroup" } else { "ts1_dynamic_talkgroup" };
        let sql = format!("UPDATE repeaters SET {column} = $1, updated_at = NOW() WHERE id = $2");
        sqlx::query(&sql)
            .bind(tg.map(|t| t.0 as i64))
            .bind(id.0 as i64)
            .execute(&self.pool)
            .await
            .context("set dynamic talkgroup")?;
        Ok(())
    }

    async fn delete_session_fields(&self, _id: RepeaterId) -> ControlResult<()> {
        // Volatile session state (connection state, salt, last ping) lives in
        // the KV store, not Postgres; nothing to clear here. Kept as an
        // explicit no-op so callers don't need to special-case the repo.
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> ControlResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, callsign, approved, suspended, admin, super_admin FROM users WHERE id = $1",
        )
        .bind(id.0 as i64)
        .fetch_optional(&self.pool)
        .await
        .context("get user")?;

        let Some(row) = row else { return Ok(None) };

        let repeaters = self.repeaters_owned_by(id).await?;

        Ok(Some(User {
            id: UserId(row.get::<i64, _>("id") as u32),
            callsign: row.get("callsign"),
            approved: row.get("approved"),
            suspended: row.get("suspended"),
            admin: row.get("admin"),
            super_admin: row.get("super_admin"),
            repeaters,
        }))
    }

    async fn get_talkgroup(&self, id: TalkgroupId) -> ControlResult<Option<Talkgroup>> {
        let row = sqlx::query("SELECT id, name, description FROM talkgroups WHERE id = $1")
            .bind(id.0 as i64)
            .fetch_optional(&self.pool)
            .await
            .context("get talkgroup")?;

        let Some(row) = row else { return Ok(None) };

        let admins = sqlx::query("SELECT user_id FROM talkgroup_admins WHERE talkgroup_id = $1")
            .bind(id.0 as i64)
            .fetch_all(&self.pool)
            .await
            .context("list talkgroup admins")?
            .into_iter()
            .map(|r| UserId(r.get::<i64, _>("user_id") as u32))
            .collect();

        let ncos = sqlx::query("SELECT user_id FROM talkgroup_ncos WHERE talkgroup_id = $1")
            .bind(id.0 as i64)
            .fetch_all(&self.pool)
            .await
            .context("list talkgroup ncos")?
            .into_iter()
            .map(|r| UserId(r.get::<i64, _>("user_id") as u32))
            .collect();

        Ok(Some(Talkgroup {
            id: TalkgroupId(row.get::<i64, _>("id") as u32),
            name: row.get("name"),
            description: row.get("description"),
            admins,
            ncos,
        }))
    }

    async fn repeaters_owned_by(&self, user: UserId) -> ControlResult<Vec<RepeaterId>> {
        let rows = sqlx::query("SELECT id FROM repeaters WHERE owner_id = $1 ORDER BY id ASC")
            .bind(user.0 as i64)
            .fetch_all(&self.pool)
            .await
            .context("list repeaters by owner")?;
        Ok(rows.into_iter().map(|r| RepeaterId(r.get::<i64, _>("id") as u32)).collect())
    }

    async fn create_call(&self, call: &Call) -> ControlResult<()> {
        self.update_call(call).await
    }

    async fn update_call(&self, call: &Call) -> ControlResult<()> {
        sqlx::query(
            r#"
            INSERT INTO calls (
                id, stream_id, start_time, duration_ms, active, user_id, repeater_id,
                time_slot, group_call, destination_id, is_to_repeater, is_to_user, is_to_talkgroup,
                total_packets, lost_sequences, last_packet_time, loss, jitter, last_frame_num,
                rssi, ber, total_bits, has_header, has_term
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23,$24)
            ON CONFLICT (id) DO UPDATE SET
                duration_ms = EXCLUDED.duration_ms,
                active = EXCLUDED.active,
                total_packets = EXCLUDED.total_packets,
                lost_sequences = EXCLUDED.lost_sequences,
                last_packet_time = EXCLUDED.last_packet_time,
                loss = EXCLUDED.loss,
                jitter = EXCLUDED.jitter,
                last_frame_num = EXCLUDED.last_frame_num,
                rssi = EXCLUDED.rssi,
                ber = EXCLUDED.ber,
                total_bits = EXCLUDED.total_bits,
                has_header = EXCLUDED.has_header,
                has_term = EXCLUDED.has_term
            "#,
        )
        .bind(call.id.0)
        .bind(call.stream_id as i64)
        .bind(call.start_time)
        .bind(call.duration_ms)
        .bind(call.active)
        .bind(call.user_id.0 as i64)
        .bind(call.repeater_id.0 as i64)
        .bind(call.time_slot)
        .bind(call.group_call)
        .bind(call.destination_id as i64)
        .bind(call.is_to_repeater)
        .bind(call.is_to_user)
        .bind(call.is_to_talkgroup)
        .bind(call.total_packets as i32)
        .bind(call.lost_sequences as i32)
        .bind(call.last_packet_time)
        .bind(call.loss)
        .bind(call.jitter)
        .bind(call.last_frame_num as i16)
        .bind(call.rssi)
        .bind(call.ber)
        .bind(call.total_bits as i64)
        .bind(call.has_header)
        .bind(call.has_term)
        .execute(&self.pool)
        .await
        .context("upsert call")?;
        Ok(())
    }

    async fn delete_call(&self, id: CallId) -> ControlResult<()> {
        sqlx::query("DELETE FROM calls WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .context("delete call")?;
        Ok(())
    }

    async fn last_call_for_user(&self, user: UserId) -> ControlResult<Option<Call>> {
        let row = sqlx::query(
            r#"
            SELECT id, stream_id, start_time, duration_ms, active, user_id, repeater_id,
                   time_slot, group_call, destination_id, is_to_repeater, is_to_user, is_to_talkgroup,
                   total_packets, lost_sequences, last_packet_time, loss, jitter, last_frame_num,
                   rssi, ber, total_bits, has_header, has_term
            FROM calls
            WHERE user_id = $1
            ORDER BY start_time DESC
            LIMIT 1
            "#,
        )
        .bind(user.0 as i64)
        .fetch_optional(&self.pool)
        .await
        .context("last call for user")?;

        Ok(row.map(|row| Call {
            id: CallId(row.get("id")),
            stream_id: row.get::<i64, _>("stream_id") as u32,
            start_time: row.get("start_time"),
            duration_ms: row.get("duration_ms"),
            active: row.get("active"),
            user_id: UserId(row.get::<i64, _>("user_id") as u32),
            repeater_id: RepeaterId(row.get::<i64, _>("repeater_id") as u32),
            time_slot: row.get("time_slot"),
            group_call: row.get("group_call"),
            destination_id: row.get::<i64, _>("destination_id") as u32,
            is_to_repeater: row.get("is_to_repeater"),
            is_to_user: row.get("is_to_user"),
            is_to_talkgroup: row.get("is_to_talkgroup"),
            total_packets: row.get::<i32, _>("total_packets") as u32,
            lost_sequences: row.get::<i32, _>("lost_sequences") as u32,
            last_packet_time: row.get("last_packet_time"),
            loss: row.get("loss"),
            jitter: row.get("jitter"),
            last_frame_num: row.get::<i16, _>("last_frame_num") as u8,
            rssi: row.get("rssi"),
            ber: row.get("ber"),
            total_bits: row.get::<i64, _>("total_bits") as u64,
            has_header: row.get("has_header"),
            has_term: row.get("has_term"),
        }))
    }
}
