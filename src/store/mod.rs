// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Gateway to the route network store.
//!
//! Two schemas hold the same tables: `route_network` is the authoritative
//! store the GIS editors write into, `route_network_integrator` is this
//! system's shadow mirror of the last reconciled state. Spatial reads go to
//! the shadow (classification must only ever see reconciled state); writes
//! invented by the integrator land in both schemas; shadow-only upserts
//! record entities the editor already put into the authoritative schema.

#[cfg(test)]
pub mod testing;

use crate::ETRS89_UTM32_SRID;
use crate::config::ApplicationSettings;
use crate::error::IntegratorError;
use crate::models::{RouteNode, RouteSegment};
use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};
use uuid::Uuid;

const SHADOW: &str = "route_network_integrator";
const NETWORK: &str = "route_network";

/// The store operations the classifier and mutator are written against.
#[async_trait]
pub trait GeoDatabase: Send + Sync {
    async fn route_node_shadow(&self, mrid: Uuid) -> Result<Option<RouteNode>, IntegratorError>;
    async fn route_segment_shadow(
        &self,
        mrid: Uuid,
    ) -> Result<Option<RouteSegment>, IntegratorError>;

    /// Nodes within tolerance of the segment's start point.
    async fn intersecting_start_nodes(
        &self,
        segment: &RouteSegment,
    ) -> Result<Vec<RouteNode>, IntegratorError>;
    /// Nodes within tolerance of the segment's end point.
    async fn intersecting_end_nodes(
        &self,
        segment: &RouteSegment,
    ) -> Result<Vec<RouteNode>, IntegratorError>;
    /// Nodes within tolerance of the segment's line, excluding both
    /// endpoint buffers. Candidates for a mid-line split.
    async fn intersecting_interior_nodes(
        &self,
        segment: &RouteSegment,
    ) -> Result<Vec<RouteNode>, IntegratorError>;
    /// Nodes within tolerance of the node, the node itself excluded.
    async fn intersecting_nodes(
        &self,
        node: &RouteNode,
    ) -> Result<Vec<RouteNode>, IntegratorError>;
    /// Segments within tolerance of the node.
    async fn intersecting_segments_by_node(
        &self,
        node: &RouteNode,
    ) -> Result<Vec<RouteSegment>, IntegratorError>;
    /// Segments within tolerance of the segment's line, itself excluded.
    async fn intersecting_segments(
        &self,
        segment: &RouteSegment,
    ) -> Result<Vec<RouteSegment>, IntegratorError>;
    /// Segments within tolerance of the segment's start point, itself excluded.
    async fn intersecting_start_segments(
        &self,
        segment: &RouteSegment,
    ) -> Result<Vec<RouteSegment>, IntegratorError>;
    /// Segments within tolerance of the segment's end point, itself excluded.
    async fn intersecting_end_segments(
        &self,
        segment: &RouteSegment,
    ) -> Result<Vec<RouteSegment>, IntegratorError>;

    /// Snap the stored segment's line to the point (within twice the
    /// tolerance), split it there, and hand back the WKB of the resulting
    /// geometry collection.
    async fn split_segment_at_point(
        &self,
        segment_mrid: Uuid,
        point_wkb: &[u8],
    ) -> Result<Vec<u8>, IntegratorError>;

    async fn insert_route_node(&self, node: &RouteNode) -> Result<(), IntegratorError>;
    async fn insert_route_segment(&self, segment: &RouteSegment) -> Result<(), IntegratorError>;
    async fn mark_delete_route_segment(&self, mrid: Uuid) -> Result<(), IntegratorError>;
    async fn delete_route_node(&self, mrid: Uuid) -> Result<(), IntegratorError>;
    async fn delete_route_segment(&self, mrid: Uuid) -> Result<(), IntegratorError>;

    async fn insert_route_node_shadow(&self, node: &RouteNode) -> Result<(), IntegratorError>;
    async fn insert_route_segment_shadow(
        &self,
        segment: &RouteSegment,
    ) -> Result<(), IntegratorError>;
    async fn update_route_node_shadow(&self, node: &RouteNode) -> Result<(), IntegratorError>;
    async fn update_route_segment_shadow(
        &self,
        segment: &RouteSegment,
    ) -> Result<(), IntegratorError>;
}

pub struct Postgis {
    pool: PgPool,
    tolerance: f64,
}

impl Postgis {
    pub fn new(pool: PgPool, settings: &ApplicationSettings) -> Postgis {
        Postgis {
            pool,
            tolerance: settings.tolerance,
        }
    }

    async fn nodes_query(
        &self,
        query_str: String,
        coord: &[u8],
        exclude: Option<Uuid>,
    ) -> Result<Vec<RouteNode>, IntegratorError> {
        let mut query = sqlx::query(query_str.as_str())
            .bind(coord)
            .bind(self.tolerance);
        if let Some(mrid) = exclude {
            query = query.bind(mrid);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(node_from_geometry_row).collect())
    }

    async fn segments_query(
        &self,
        query_str: String,
        coord: &[u8],
        exclude: Option<Uuid>,
    ) -> Result<Vec<RouteSegment>, IntegratorError> {
        let mut query = sqlx::query(query_str.as_str())
            .bind(coord)
            .bind(self.tolerance);
        if let Some(mrid) = exclude {
            query = query.bind(mrid);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(segment_from_geometry_row).collect())
    }
}

fn node_from_geometry_row(row: &PgRow) -> RouteNode {
    RouteNode {
        mrid: row.get("mrid"),
        coord: row.get("coord"),
        ..Default::default()
    }
}

fn segment_from_geometry_row(row: &PgRow) -> RouteSegment {
    RouteSegment {
        mrid: row.get("mrid"),
        coord: row.get("coord"),
        ..Default::default()
    }
}

fn node_from_shadow_row(row: &PgRow) -> RouteNode {
    RouteNode {
        mrid: row.get("mrid"),
        coord: row.get("coord"),
        work_task_mrid: row.get("work_task_mrid"),
        user_name: row.get("user_name"),
        application_name: row.get("application_name"),
        application_info: None,
        marked_to_be_deleted: row.get("marked_to_be_deleted"),
        delete_me: false,
    }
}

fn segment_from_shadow_row(row: &PgRow) -> RouteSegment {
    RouteSegment {
        mrid: row.get("mrid"),
        coord: row.get("coord"),
        work_task_mrid: row.get("work_task_mrid"),
        user_name: row.get("user_name"),
        application_name: row.get("application_name"),
        application_info: None,
        marked_to_be_deleted: row.get("marked_to_be_deleted"),
        delete_me: false,
    }
}

#[async_trait]
impl GeoDatabase for Postgis {
    async fn route_node_shadow(&self, mrid: Uuid) -> Result<Option<RouteNode>, IntegratorError> {
        let query_str = format!(
            "SELECT ST_AsBinary(coord) AS coord, mrid, marked_to_be_deleted,
             work_task_mrid, user_name, application_name
             FROM {SHADOW}.route_node
             WHERE mrid = $1 AND marked_to_be_deleted = false"
        );
        let row = sqlx::query(query_str.as_str())
            .bind(mrid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(node_from_shadow_row))
    }

    async fn route_segment_shadow(
        &self,
        mrid: Uuid,
    ) -> Result<Option<RouteSegment>, IntegratorError> {
        let query_str = format!(
            "SELECT ST_AsBinary(coord) AS coord, mrid, marked_to_be_deleted,
             work_task_mrid, user_name, application_name
             FROM {SHADOW}.route_segment
             WHERE mrid = $1 AND marked_to_be_deleted = false"
        );
        let row = sqlx::query(query_str.as_str())
            .bind(mrid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(segment_from_shadow_row))
    }

    async fn intersecting_start_nodes(
        &self,
        segment: &RouteSegment,
    ) -> Result<Vec<RouteNode>, IntegratorError> {
        let query_str = format!(
            "SELECT ST_AsBinary(coord) AS coord, mrid FROM {SHADOW}.route_node
             WHERE ST_Intersects(
               ST_Buffer(ST_StartPoint(ST_GeomFromWKB($1, {ETRS89_UTM32_SRID})), $2),
               coord) AND marked_to_be_deleted = false"
        );
        self.nodes_query(query_str, &segment.coord, None).await
    }

    async fn intersecting_end_nodes(
        &self,
        segment: &RouteSegment,
    ) -> Result<Vec<RouteNode>, IntegratorError> {
        let query_str = format!(
            "SELECT ST_AsBinary(coord) AS coord, mrid FROM {SHADOW}.route_node
             WHERE ST_Intersects(
               ST_Buffer(ST_EndPoint(ST_GeomFromWKB($1, {ETRS89_UTM32_SRID})), $2),
               coord) AND marked_to_be_deleted = false"
        );
        self.nodes_query(query_str, &segment.coord, None).await
    }

    async fn intersecting_interior_nodes(
        &self,
        segment: &RouteSegment,
    ) -> Result<Vec<RouteNode>, IntegratorError> {
        let query_str = format!(
            "SELECT ST_AsBinary(coord) AS coord, mrid FROM {SHADOW}.route_node
             WHERE ST_Intersects(
               ST_Buffer(ST_GeomFromWKB($1, {ETRS89_UTM32_SRID}), $2),
               coord)
             AND marked_to_be_deleted = false
             AND NOT ST_Intersects(
               ST_Buffer(ST_StartPoint(ST_GeomFromWKB($1, {ETRS89_UTM32_SRID})), $2),
               coord)
             AND NOT ST_Intersects(
               ST_Buffer(ST_EndPoint(ST_GeomFromWKB($1, {ETRS89_UTM32_SRID})), $2),
               coord)"
        );
        self.nodes_query(query_str, &segment.coord, None).await
    }

    async fn intersecting_nodes(
        &self,
        node: &RouteNode,
    ) -> Result<Vec<RouteNode>, IntegratorError> {
        let query_str = format!(
            "SELECT ST_AsBinary(coord) AS coord, mrid FROM {SHADOW}.route_node
             WHERE ST_Intersects(
               ST_Buffer(ST_GeomFromWKB($1, {ETRS89_UTM32_SRID}), $2),
               coord) AND mrid != $3 AND marked_to_be_deleted = false"
        );
        self.nodes_query(query_str, &node.coord, Some(node.mrid))
            .await
    }

    async fn intersecting_segments_by_node(
        &self,
        node: &RouteNode,
    ) -> Result<Vec<RouteSegment>, IntegratorError> {
        let query_str = format!(
            "SELECT ST_AsBinary(coord) AS coord, mrid FROM {SHADOW}.route_segment
             WHERE ST_Intersects(
               ST_Buffer(ST_GeomFromWKB($1, {ETRS89_UTM32_SRID}), $2),
               coord) AND marked_to_be_deleted = false"
        );
        self.segments_query(query_str, &node.coord, None).await
    }

    async fn intersecting_segments(
        &self,
        segment: &RouteSegment,
    ) -> Result<Vec<RouteSegment>, IntegratorError> {
        let query_str = format!(
            "SELECT ST_AsBinary(coord) AS coord, mrid FROM {SHADOW}.route_segment
             WHERE ST_Intersects(
               ST_Buffer(ST_GeomFromWKB($1, {ETRS89_UTM32_SRID}), $2),
               coord) AND mrid != $3 AND marked_to_be_deleted = false"
        );
        self.segments_query(query_str, &segment.coord, Some(segment.mrid))
            .await
    }

    async fn intersecting_start_segments(
        &self,
        segment: &RouteSegment,
    ) -> Result<Vec<RouteSegment>, IntegratorError> {
        let query_str = format!(
            "SELECT ST_AsBinary(coord) AS coord, mrid FROM {SHADOW}.route_segment
             WHERE ST_Intersects(
               ST_Buffer(ST_StartPoint(ST_GeomFromWKB($1, {ETRS89_UTM32_SRID})), $2),
               coord) AND mrid != $3 AND marked_to_be_deleted = false"
        );
        self.segments_query(query_str, &segment.coord, Some(segment.mrid))
            .await
    }

    async fn intersecting_end_segments(
        &self,
        segment: &RouteSegment,
    ) -> Result<Vec<RouteSegment>, IntegratorError> {
        let query_str = format!(
            "SELECT ST_AsBinary(coord) AS coord, mrid FROM {SHADOW}.route_segment
             WHERE ST_Intersects(
               ST_Buffer(ST_EndPoint(ST_GeomFromWKB($1, {ETRS89_UTM32_SRID})), $2),
               coord) AND mrid != $3 AND marked_to_be_deleted = false"
        );
        self.segments_query(query_str, &segment.coord, Some(segment.mrid))
            .await
    }

    async fn split_segment_at_point(
        &self,
        segment_mrid: Uuid,
        point_wkb: &[u8],
    ) -> Result<Vec<u8>, IntegratorError> {
        // snap uses a wider net than the classification buffers so the
        // split point always lands on the line it is meant to cut
        let query_str = format!(
            "SELECT ST_AsBinary(
               ST_Split(
                 ST_Snap(route_segment.coord, ST_GeomFromWKB($1, {ETRS89_UTM32_SRID}), $2),
                 ST_GeomFromWKB($1, {ETRS89_UTM32_SRID})
               )
             ) AS pieces
             FROM {SHADOW}.route_segment
             WHERE mrid = $3 AND marked_to_be_deleted = false"
        );
        let row = sqlx::query(query_str.as_str())
            .bind(point_wkb)
            .bind(self.tolerance * 2.0)
            .bind(segment_mrid)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("pieces"))
    }

    async fn insert_route_node(&self, node: &RouteNode) -> Result<(), IntegratorError> {
        for schema in [SHADOW, NETWORK] {
            let query_str = format!(
                "INSERT INTO {schema}.route_node(
                 mrid, coord, work_task_mrid, user_name, application_name,
                 marked_to_be_deleted, delete_me)
                 VALUES($1, ST_GeomFromWKB($2, {ETRS89_UTM32_SRID}), $3, $4, $5, false, false)"
            );
            sqlx::query(query_str.as_str())
                .bind(node.mrid)
                .bind(&node.coord)
                .bind(node.work_task_mrid)
                .bind(&node.user_name)
                .bind(&node.application_name)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn insert_route_segment(&self, segment: &RouteSegment) -> Result<(), IntegratorError> {
        for schema in [SHADOW, NETWORK] {
            let query_str = format!(
                "INSERT INTO {schema}.route_segment(
                 mrid, coord, work_task_mrid, user_name, application_name,
                 marked_to_be_deleted, delete_me)
                 VALUES($1, ST_GeomFromWKB($2, {ETRS89_UTM32_SRID}), $3, $4, $5, false, false)"
            );
            sqlx::query(query_str.as_str())
                .bind(segment.mrid)
                .bind(&segment.coord)
                .bind(segment.work_task_mrid)
                .bind(&segment.user_name)
                .bind(&segment.application_name)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn mark_delete_route_segment(&self, mrid: Uuid) -> Result<(), IntegratorError> {
        for schema in [SHADOW, NETWORK] {
            let query_str = format!(
                "UPDATE {schema}.route_segment SET marked_to_be_deleted = true WHERE mrid = $1"
            );
            sqlx::query(query_str.as_str())
                .bind(mrid)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn delete_route_node(&self, mrid: Uuid) -> Result<(), IntegratorError> {
        for schema in [SHADOW, NETWORK] {
            let query_str =
                format!("UPDATE {schema}.route_node SET delete_me = true WHERE mrid = $1");
            sqlx::query(query_str.as_str())
                .bind(mrid)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn delete_route_segment(&self, mrid: Uuid) -> Result<(), IntegratorError> {
        for schema in [SHADOW, NETWORK] {
            let query_str =
                format!("UPDATE {schema}.route_segment SET delete_me = true WHERE mrid = $1");
            sqlx::query(query_str.as_str())
                .bind(mrid)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn insert_route_node_shadow(&self, node: &RouteNode) -> Result<(), IntegratorError> {
        let query_str = format!(
            "INSERT INTO {SHADOW}.route_node(
             mrid, coord, work_task_mrid, user_name, application_name,
             application_info, marked_to_be_deleted, delete_me)
             VALUES($1, ST_GeomFromWKB($2, {ETRS89_UTM32_SRID}), $3, $4, $5, $6, $7, $8)
             ON CONFLICT ON CONSTRAINT route_node_pkey DO NOTHING"
        );
        sqlx::query(query_str.as_str())
            .bind(node.mrid)
            .bind(&node.coord)
            .bind(node.work_task_mrid)
            .bind(&node.user_name)
            .bind(&node.application_name)
            .bind(&node.application_info)
            .bind(node.marked_to_be_deleted)
            .bind(node.delete_me)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_route_segment_shadow(
        &self,
        segment: &RouteSegment,
    ) -> Result<(), IntegratorError> {
        let query_str = format!(
            "INSERT INTO {SHADOW}.route_segment(
             mrid, coord, work_task_mrid, user_name, application_name,
             application_info, marked_to_be_deleted, delete_me)
             VALUES($1, ST_GeomFromWKB($2, {ETRS89_UTM32_SRID}), $3, $4, $5, $6, $7, $8)
             ON CONFLICT ON CONSTRAINT route_segment_pkey DO NOTHING"
        );
        sqlx::query(query_str.as_str())
            .bind(segment.mrid)
            .bind(&segment.coord)
            .bind(segment.work_task_mrid)
            .bind(&segment.user_name)
            .bind(&segment.application_name)
            .bind(&segment.application_info)
            .bind(segment.marked_to_be_deleted)
            .bind(segment.delete_me)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_route_node_shadow(&self, node: &RouteNode) -> Result<(), IntegratorError> {
        let query_str = format!(
            "UPDATE {SHADOW}.route_node SET
             coord = ST_GeomFromWKB($2, {ETRS89_UTM32_SRID}),
             work_task_mrid = $3,
             user_name = $4,
             application_name = $5,
             marked_to_be_deleted = $6
             WHERE mrid = $1"
        );
        sqlx::query(query_str.as_str())
            .bind(node.mrid)
            .bind(&node.coord)
            .bind(node.work_task_mrid)
            .bind(&node.user_name)
            .bind(&node.application_name)
            .bind(node.marked_to_be_deleted)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_route_segment_shadow(
        &self,
        segment: &RouteSegment,
    ) -> Result<(), IntegratorError> {
        let query_str = format!(
            "UPDATE {SHADOW}.route_segment SET
             coord = ST_GeomFromWKB($2, {ETRS89_UTM32_SRID}),
             work_task_mrid = $3,
             user_name = $4,
             application_name = $5,
             marked_to_be_deleted = $6
             WHERE mrid = $1"
        );
        sqlx::query(query_str.as_str())
            .bind(segment.mrid)
            .bind(&segment.coord)
            .bind(segment.work_task_mrid)
            .bind(&segment.user_name)
            .bind(&segment.application_name)
            .bind(segment.marked_to_be_deleted)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
